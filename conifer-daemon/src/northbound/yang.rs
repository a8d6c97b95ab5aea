//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use conifer_yang::schema::{
    Condition, Must, TypeSpec, container, leaf, leaf_list, list,
};
use conifer_yang::{Context, YANG_CTX};

// Initializes the global schema context with the built-in modules.
pub(crate) fn create_context() {
    YANG_CTX.get_or_init(build_context);
}

// Compiles the built-in modules.
//
// The YANG parser proper is an external collaborator; the daemon ships its
// base modules pre-compiled and plugins may extend the set before the
// context is sealed.
pub(crate) fn build_context() -> std::sync::Arc<Context> {
    Context::builder()
        .module("conifer-system", "urn:conifer:system", "sys")
        .revision("2025-11-04")
        .node(
            container("system")
                .child(leaf(
                    "hostname",
                    TypeSpec::string()
                        .length(1, 253)
                        .pattern(r"[A-Za-z0-9][A-Za-z0-9\-\.]*"),
                ))
                .child(leaf("location", TypeSpec::string()))
                .child(leaf_list("dns-server", TypeSpec::string()))
                .child(
                    container("ntp")
                        .presence()
                        .must(Must::new(
                            Condition::exists(
                                "/conifer-system:system/ntp/server",
                            ),
                            Some("at least one NTP server must be configured"),
                        ))
                        .child(
                            leaf("enabled", TypeSpec::boolean())
                                .default_value("true"),
                        )
                        .child(
                            list("server")
                                .key("address")
                                .child(leaf("address", TypeSpec::string()))
                                .child(
                                    leaf(
                                        "prefer",
                                        TypeSpec::boolean(),
                                    )
                                    .default_value("false"),
                                ),
                        ),
                )
                .child(
                    list("user")
                        .key("name")
                        .unique(["uid"])
                        .child(leaf("name", TypeSpec::string()))
                        .child(
                            leaf("uid", TypeSpec::uint32()).mandatory(),
                        )
                        .child(leaf(
                            "class",
                            TypeSpec::enumeration([
                                "super-user",
                                "operator",
                                "read-only",
                            ]),
                        )),
                ),
        )
        .module("conifer-interfaces", "urn:conifer:interfaces", "if")
        .revision("2025-11-04")
        .node(
            container("interfaces").child(
                list("interface")
                    .key("name")
                    .child(leaf("name", TypeSpec::string()))
                    .child(
                        leaf("description", TypeSpec::string().length(0, 255)),
                    )
                    .child(
                        leaf("enabled", TypeSpec::boolean())
                            .default_value("true"),
                    )
                    .child(leaf("mtu", TypeSpec::uint16().urange(68, 65535))),
            ),
        )
        .build()
        .expect("failed to compile built-in YANG modules")
}
