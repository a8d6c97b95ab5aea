//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use std::str::FromStr;
use std::sync::Arc;

use conifer_datastore::xml::XmlElement;
use conifer_datastore::{DataTree, EditOp, Store};
use conifer_northbound::error::{ErrorRecord, ErrorTag};
use conifer_yang::{Context, YANG_CTX};
use nix::unistd::{Uid, User};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite,
    AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc::{Sender, UnboundedReceiver};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, Framing, TransportFamily};
use crate::northbound::client::api::{
    ConfigSource, Operation, Reply, SessionMsg, client,
};

const NETCONF_BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

// Upper bound on a single framed message.
const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

// ===== global functions =====

/// Starts the management transport listener.
pub(crate) fn start(
    config: &Config,
    client_tx: Sender<client::Request>,
) -> JoinHandle<()> {
    let family = config.transport.family;
    let path = config.transport.path.clone();
    let address = config.transport.address.clone();
    let framing = config.netconf.framing;
    let ctx = YANG_CTX.get().unwrap().clone();

    tokio::spawn(async move {
        match family {
            TransportFamily::Unix => {
                serve_unix(path, framing, ctx, client_tx).await;
            }
            TransportFamily::Ipv4 | TransportFamily::Ipv6 => {
                serve_tcp(address, framing, ctx, client_tx).await;
            }
        }
    })
}

async fn serve_unix(
    path: String,
    framing: Framing,
    ctx: Arc<Context>,
    client_tx: Sender<client::Request>,
) {
    // A stale socket from a previous run would fail the bind.
    let _ = std::fs::remove_file(&path);
    let listener = match UnixListener::bind(&path) {
        Ok(listener) => listener,
        Err(error) => {
            error!(%error, %path, "failed to bind unix socket");
            std::process::exit(1);
        }
    };
    info!(%path, "listening on unix socket");

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let (username, privileged) = match stream.peer_cred() {
                    Ok(cred) => {
                        let uid = Uid::from_raw(cred.uid());
                        let username = User::from_uid(uid)
                            .ok()
                            .flatten()
                            .map(|user| user.name);
                        (username, uid.is_root() || uid == Uid::effective())
                    }
                    Err(_) => (None, false),
                };
                tokio::spawn(handle_session(
                    stream,
                    framing,
                    ctx.clone(),
                    client_tx.clone(),
                    username,
                    privileged,
                ));
            }
            Err(error) => {
                warn!(%error, "failed to accept connection");
            }
        }
    }
}

async fn serve_tcp(
    address: String,
    framing: Framing,
    ctx: Arc<Context>,
    client_tx: Sender<client::Request>,
) {
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%error, %address, "failed to bind listen address");
            std::process::exit(1);
        }
    };
    info!(%address, "listening on TCP socket");

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                // No peer credentials on TCP; these sessions are never
                // privileged.
                tokio::spawn(handle_session(
                    stream,
                    framing,
                    ctx.clone(),
                    client_tx.clone(),
                    None,
                    false,
                ));
            }
            Err(error) => {
                warn!(%error, "failed to accept connection");
            }
        }
    }
}

// Serves one client session: decodes framed requests, relays them to the
// northbound core, and writes framed replies and notifications.
async fn handle_session<S>(
    stream: S,
    framing: Framing,
    ctx: Arc<Context>,
    client_tx: Sender<client::Request>,
    username: Option<String>,
    privileged: bool,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let (tx, rx) = mpsc::unbounded_channel::<SessionMsg>();

    // Attach the session to the core.
    let (responder_tx, responder_rx) = oneshot::channel();
    let attach = client::Request::Attach(client::AttachRequest {
        username,
        privileged,
        tx: tx.clone(),
        responder: responder_tx,
    });
    if client_tx.send(attach).await.is_err() {
        return;
    }
    let Ok(response) = responder_rx.await else {
        return;
    };
    let session_id = response.session_id;
    debug!(%session_id, "netconf session established");

    // All writes (replies and notifications) funnel through one task.
    let mut writer_task = tokio::spawn(writer_loop(write_half, rx, framing));
    let mut writer_done = false;

    // Advertise capabilities.
    let _ = tx.send(SessionMsg::Message(hello_message(session_id)));

    loop {
        tokio::select! {
            biased;
            _ = &mut writer_task, if !writer_done => {
                writer_done = true;
                break;
            }
            result = read_message(&mut reader, framing) => {
                let message = match result {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(error) => {
                        debug!(%session_id, %error, "read failed");
                        break;
                    }
                };
                let (reply, close) = process_message(
                    &ctx,
                    &client_tx,
                    session_id,
                    &message,
                )
                .await;
                if let Some(reply) = reply
                    && tx.send(SessionMsg::Message(reply)).is_err()
                {
                    break;
                }
                if close {
                    break;
                }
            }
        }
    }

    // The reply sink is gone; the core discards anything still in flight.
    let detach =
        client::Request::Detach(client::DetachRequest { session_id });
    let _ = client_tx.send(detach).await;
    drop(tx);
    if !writer_done {
        let _ = writer_task.await;
    }
    debug!(%session_id, "netconf session closed");
}

async fn writer_loop<W>(
    mut writer: W,
    mut rx: UnboundedReceiver<SessionMsg>,
    framing: Framing,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        match msg {
            SessionMsg::Message(payload) => {
                if write_message(&mut writer, framing, &payload)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            SessionMsg::Shutdown => break,
        }
    }
}

// Decodes one `<rpc>` document, relays the operation to the core, and
// renders the `<rpc-reply>`. Returns the reply and whether the session is
// done.
async fn process_message(
    ctx: &Arc<Context>,
    client_tx: &Sender<client::Request>,
    session_id: u32,
    message: &str,
) -> (Option<String>, bool) {
    let envelope = match XmlElement::parse(message) {
        Ok(envelope) => envelope,
        Err(error) => {
            let errors = [ErrorRecord::rpc(
                ErrorTag::MalformedMessage,
                &error.to_string(),
            )];
            return (Some(rpc_reply_errors(None, &errors)), false);
        }
    };

    // The capabilities exchange needs no reply.
    if envelope.name == "hello" {
        return (None, false);
    }

    let message_id =
        envelope.attr("message-id").map(str::to_owned);
    if envelope.name != "rpc" {
        let errors = [ErrorRecord::rpc(
            ErrorTag::MalformedMessage,
            "expected an rpc element",
        )];
        return (Some(rpc_reply_errors(message_id.as_deref(), &errors)), false);
    }
    let Some(op_element) = envelope.children.first() else {
        let errors = [ErrorRecord::rpc(
            ErrorTag::MissingElement,
            "rpc carries no operation",
        )];
        return (Some(rpc_reply_errors(message_id.as_deref(), &errors)), false);
    };

    let operation = match decode_operation(ctx, op_element) {
        Ok(operation) => operation,
        Err(error) => {
            let errors = [error];
            return (
                Some(rpc_reply_errors(message_id.as_deref(), &errors)),
                false,
            );
        }
    };
    let close = matches!(operation, Operation::CloseSession);

    // Relay to the core and wait for the response.
    let (responder_tx, responder_rx) = oneshot::channel();
    let request = client::Request::Rpc(client::RpcRequest {
        session_id,
        operation,
        responder: responder_tx,
    });
    if client_tx.send(request).await.is_err() {
        return (None, true);
    }
    let response = match responder_rx.await {
        Ok(response) => response,
        Err(_) => return (None, true),
    };

    let reply = match response {
        Ok(reply) => rpc_reply_ok(message_id.as_deref(), reply),
        Err(errors) => rpc_reply_errors(message_id.as_deref(), &errors),
    };
    (Some(reply), close)
}

// ===== operation decoding =====

fn decode_operation(
    ctx: &Arc<Context>,
    element: &XmlElement,
) -> Result<Operation, ErrorRecord> {
    match element.name.as_str() {
        "get-config" => {
            let source = decode_store_ref(element, "source")?;
            let filter = decode_filter(element)?;
            Ok(Operation::GetConfig { source, filter })
        }
        "edit-config" => {
            let target = decode_store_ref(element, "target")?;
            let default_op = match element.find_child("default-operation") {
                Some(child) => {
                    let text = child.text.as_deref().unwrap_or("");
                    EditOp::from_str(text).map_err(|_| {
                        ErrorRecord::protocol(
                            ErrorTag::InvalidValue,
                            &format!("unknown default-operation: {text}"),
                        )
                    })?
                }
                None => EditOp::Merge,
            };
            let config_element =
                element.find_child("config").ok_or_else(|| {
                    ErrorRecord::protocol(
                        ErrorTag::MissingElement,
                        "edit-config carries no config element",
                    )
                })?;
            let config = DataTree::from_element(ctx.clone(), config_element)
                .map_err(ErrorRecord::from)?;
            Ok(Operation::EditConfig { target, default_op, config })
        }
        "copy-config" => {
            let source = decode_config_source(ctx, element)?;
            let target = decode_store_ref(element, "target")?;
            Ok(Operation::CopyConfig { source, target })
        }
        "delete-config" => {
            let target = decode_store_ref(element, "target")?;
            Ok(Operation::DeleteConfig { target })
        }
        "validate" => {
            let source = decode_config_source(ctx, element)?;
            Ok(Operation::Validate { source })
        }
        "commit" => Ok(Operation::Commit),
        "discard-changes" => Ok(Operation::DiscardChanges),
        "lock" => {
            let target = decode_store_ref(element, "target")?;
            Ok(Operation::Lock { target })
        }
        "unlock" => {
            let target = decode_store_ref(element, "target")?;
            Ok(Operation::Unlock { target })
        }
        "close-session" => Ok(Operation::CloseSession),
        "kill-session" => {
            let session_id = element
                .find_child("session-id")
                .and_then(|child| child.text.as_deref())
                .and_then(|text| text.parse().ok())
                .ok_or_else(|| {
                    ErrorRecord::protocol(
                        ErrorTag::MissingElement,
                        "kill-session needs a session-id",
                    )
                })?;
            Ok(Operation::KillSession { session_id })
        }
        "create-subscription" => {
            let stream = element
                .find_child("stream")
                .and_then(|child| child.text.clone())
                .unwrap_or_else(|| "NETCONF".to_owned());
            let start_time = element
                .find_child("startTime")
                .and_then(|child| child.text.clone());
            let stop_time = element
                .find_child("stopTime")
                .and_then(|child| child.text.clone());
            Ok(Operation::CreateSubscription { stream, start_time, stop_time })
        }
        "debug" => {
            let level = element
                .find_child("level")
                .and_then(|child| child.text.as_deref())
                .and_then(|text| text.parse().ok())
                .ok_or_else(|| {
                    ErrorRecord::protocol(
                        ErrorTag::MissingElement,
                        "debug needs a level",
                    )
                })?;
            Ok(Operation::Debug { level })
        }
        "list-transactions" => Ok(Operation::ListTransactions),
        "rollback" => {
            let transaction_id = element
                .find_child("id")
                .and_then(|child| child.text.as_deref())
                .and_then(|text| text.parse().ok())
                .ok_or_else(|| {
                    ErrorRecord::protocol(
                        ErrorTag::MissingElement,
                        "rollback needs a transaction id",
                    )
                })?;
            Ok(Operation::Rollback { transaction_id })
        }
        name => Err(ErrorRecord::protocol(
            ErrorTag::OperationNotSupported,
            &format!("unknown operation: {name}"),
        )),
    }
}

// Decodes a `<source>`/`<target>` datastore reference.
fn decode_store_ref(
    element: &XmlElement,
    container: &str,
) -> Result<Store, ErrorRecord> {
    let container = element.find_child(container).ok_or_else(|| {
        ErrorRecord::protocol(
            ErrorTag::MissingElement,
            &format!("{} carries no {container}", element.name),
        )
    })?;
    let store = container.children.first().ok_or_else(|| {
        ErrorRecord::protocol(
            ErrorTag::MissingElement,
            "empty datastore reference",
        )
    })?;
    Store::from_str(&store.name).map_err(|_| {
        ErrorRecord::protocol(
            ErrorTag::BadElement,
            &format!("unknown datastore: {}", store.name),
        )
    })
}

// Decodes a `<source>` that may be a datastore name or an inline config.
fn decode_config_source(
    ctx: &Arc<Context>,
    element: &XmlElement,
) -> Result<ConfigSource, ErrorRecord> {
    let source = element.find_child("source").ok_or_else(|| {
        ErrorRecord::protocol(
            ErrorTag::MissingElement,
            &format!("{} carries no source", element.name),
        )
    })?;
    let inner = source.children.first().ok_or_else(|| {
        ErrorRecord::protocol(
            ErrorTag::MissingElement,
            "empty source reference",
        )
    })?;
    if inner.name == "config" {
        let tree = DataTree::from_element(ctx.clone(), inner)
            .map_err(ErrorRecord::from)?;
        return Ok(ConfigSource::Config(tree));
    }
    Store::from_str(&inner.name)
        .map(ConfigSource::Store)
        .map_err(|_| {
            ErrorRecord::protocol(
                ErrorTag::BadElement,
                &format!("unknown datastore: {}", inner.name),
            )
        })
}

// Decodes an optional xpath filter. Subtree filtering is not implemented.
fn decode_filter(
    element: &XmlElement,
) -> Result<Option<String>, ErrorRecord> {
    let Some(filter) = element.find_child("filter") else {
        return Ok(None);
    };
    match filter.attr("type") {
        Some("xpath") => {
            let select = filter.attr("select").ok_or_else(|| {
                ErrorRecord::protocol(
                    ErrorTag::MissingAttribute,
                    "xpath filter carries no select attribute",
                )
            })?;
            Ok(Some(select.to_owned()))
        }
        other => Err(ErrorRecord::protocol(
            ErrorTag::OperationNotSupported,
            &format!(
                "unsupported filter type: {}",
                other.unwrap_or("subtree")
            ),
        )),
    }
}

// ===== reply rendering =====

fn rpc_reply_element(message_id: Option<&str>) -> XmlElement {
    let mut reply = XmlElement::new("rpc-reply");
    reply.attrs.push(conifer_datastore::Attr {
        name: "xmlns".to_owned(),
        value: NETCONF_BASE_NS.to_owned(),
    });
    if let Some(message_id) = message_id {
        reply.attrs.push(conifer_datastore::Attr {
            name: "message-id".to_owned(),
            value: message_id.to_owned(),
        });
    }
    reply
}

fn rpc_reply_ok(message_id: Option<&str>, reply: Reply) -> String {
    let mut element = rpc_reply_element(message_id);
    match reply {
        Reply::Ok => {
            element.children.push(XmlElement::new("ok"));
        }
        Reply::Data(tree) => {
            let mut data = XmlElement::new("data");
            data.children = tree.to_element().children;
            element.children.push(data);
        }
        Reply::Transactions(transactions) => {
            let mut list = XmlElement::new("transactions");
            for transaction in transactions {
                let mut entry = XmlElement::new("transaction");
                let mut id = XmlElement::new("id");
                id.text = Some(transaction.id.to_string());
                let mut date = XmlElement::new("date");
                date.text = Some(transaction.date.to_rfc3339());
                entry.children.push(id);
                entry.children.push(date);
                if !transaction.comment.is_empty() {
                    let mut comment = XmlElement::new("comment");
                    comment.text = Some(transaction.comment.clone());
                    entry.children.push(comment);
                }
                list.children.push(entry);
            }
            element.children.push(list);
        }
    }
    element.print_string(false)
}

fn rpc_reply_errors(
    message_id: Option<&str>,
    errors: &[ErrorRecord],
) -> String {
    let mut element = rpc_reply_element(message_id);
    for error in errors {
        element.children.push(error.to_xml());
    }
    element.print_string(false)
}

fn hello_message(session_id: u32) -> String {
    let mut hello = XmlElement::new("hello");
    hello.attrs.push(conifer_datastore::Attr {
        name: "xmlns".to_owned(),
        value: NETCONF_BASE_NS.to_owned(),
    });
    let mut capabilities = XmlElement::new("capabilities");
    for capability in [
        "urn:ietf:params:netconf:base:1.1",
        "urn:ietf:params:netconf:capability:candidate:1.0",
        "urn:ietf:params:netconf:capability:validate:1.1",
        "urn:ietf:params:netconf:capability:notification:1.0",
        "urn:ietf:params:netconf:capability:xpath:1.0",
    ] {
        let mut element = XmlElement::new("capability");
        element.text = Some(capability.to_owned());
        capabilities.children.push(element);
    }
    hello.children.push(capabilities);
    let mut id = XmlElement::new("session-id");
    id.text = Some(session_id.to_string());
    hello.children.push(id);
    hello.print_string(false)
}

// ===== message framing =====

async fn read_message<R>(
    reader: &mut R,
    framing: Framing,
) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match framing {
        Framing::Chunked => read_chunked(reader).await,
        Framing::EndOfMessage => read_eom(reader).await,
    }
}

// RFC 6242 chunked framing: `\n#<len>\n<chunk>` repeated, closed by
// `\n##\n`.
async fn read_chunked<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut message = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        // Frame header.
        if reader.read(&mut byte).await? == 0 {
            return if message.is_empty() {
                Ok(None)
            } else {
                Err(framing_error("unexpected end of stream"))
            };
        }
        if byte[0] != b'\n' {
            return Err(framing_error("expected LF before chunk header"));
        }
        reader.read_exact(&mut byte).await?;
        if byte[0] != b'#' {
            return Err(framing_error("expected '#' in chunk header"));
        }
        reader.read_exact(&mut byte).await?;
        if byte[0] == b'#' {
            // End-of-chunks marker.
            reader.read_exact(&mut byte).await?;
            if byte[0] != b'\n' {
                return Err(framing_error("malformed end-of-chunks marker"));
            }
            let message = String::from_utf8(message)
                .map_err(|_| framing_error("message is not valid UTF-8"))?;
            return Ok(Some(message));
        }

        // Chunk size.
        let mut size = (byte[0] as char)
            .to_digit(10)
            .ok_or_else(|| framing_error("invalid chunk size"))?
            as usize;
        loop {
            reader.read_exact(&mut byte).await?;
            if byte[0] == b'\n' {
                break;
            }
            let digit = (byte[0] as char)
                .to_digit(10)
                .ok_or_else(|| framing_error("invalid chunk size"))?;
            size = size * 10 + digit as usize;
            if size > MAX_MESSAGE_SIZE {
                return Err(framing_error("chunk too large"));
            }
        }
        if message.len() + size > MAX_MESSAGE_SIZE {
            return Err(framing_error("message too large"));
        }

        let start = message.len();
        message.resize(start + size, 0);
        reader.read_exact(&mut message[start..]).await?;
    }
}

// Legacy framing: the message runs until the `]]>]]>` sentinel.
async fn read_eom<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buffer = Vec::new();
    loop {
        let read = reader.read_until(b'>', &mut buffer).await?;
        if read == 0 {
            return if buffer.is_empty() {
                Ok(None)
            } else {
                Err(framing_error("unexpected end of stream"))
            };
        }
        if buffer.ends_with(b"]]>]]>") {
            buffer.truncate(buffer.len() - b"]]>]]>".len());
            let message = String::from_utf8(buffer)
                .map_err(|_| framing_error("message is not valid UTF-8"))?;
            return Ok(Some(message.trim().to_owned()));
        }
        if buffer.len() > MAX_MESSAGE_SIZE {
            return Err(framing_error("message too large"));
        }
    }
}

async fn write_message<W>(
    writer: &mut W,
    framing: Framing,
    payload: &str,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match framing {
        Framing::Chunked => {
            let framed =
                format!("\n#{}\n{payload}\n##\n", payload.len());
            writer.write_all(framed.as_bytes()).await?;
        }
        Framing::EndOfMessage => {
            writer.write_all(payload.as_bytes()).await?;
            writer.write_all(b"]]>]]>").await?;
        }
    }
    writer.flush().await
}

fn framing_error(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::northbound::yang;

    fn context() -> Arc<Context> {
        yang::create_context();
        YANG_CTX.get().unwrap().clone()
    }

    #[tokio::test]
    async fn test_chunked_framing_round_trip() {
        let (client, server) = tokio::io::duplex(4096);
        let (_read, mut write) = tokio::io::split(client);
        let (read, _write) = tokio::io::split(server);
        let mut reader = BufReader::new(read);

        let payload = "<rpc message-id=\"1\"><commit/></rpc>";
        write_message(&mut write, Framing::Chunked, payload)
            .await
            .unwrap();
        let decoded = read_message(&mut reader, Framing::Chunked)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_eom_framing_round_trip() {
        let (client, server) = tokio::io::duplex(4096);
        let (_read, mut write) = tokio::io::split(client);
        let (read, _write) = tokio::io::split(server);
        let mut reader = BufReader::new(read);

        let payload = "<rpc message-id=\"1\"><discard-changes/></rpc>";
        write_message(&mut write, Framing::EndOfMessage, payload)
            .await
            .unwrap();
        let decoded = read_message(&mut reader, Framing::EndOfMessage)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_eom_eof_is_clean_close() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let (read, _write) = tokio::io::split(server);
        let mut reader = BufReader::new(read);

        let decoded = read_message(&mut reader, Framing::EndOfMessage)
            .await
            .unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_decode_edit_config() {
        let ctx = context();
        let rpc = XmlElement::parse(
            "<rpc message-id=\"2\">\
               <edit-config>\
                 <target><candidate/></target>\
                 <default-operation>replace</default-operation>\
                 <config><system xmlns=\"urn:conifer:system\">\
                   <hostname>router1</hostname></system></config>\
               </edit-config>\
             </rpc>",
        )
        .unwrap();

        let operation =
            decode_operation(&ctx, rpc.children.first().unwrap()).unwrap();
        match operation {
            Operation::EditConfig { target, default_op, config } => {
                assert_eq!(target, Store::Candidate);
                assert_eq!(default_op, EditOp::Replace);
                assert!(!config.is_empty());
            }
            other => panic!("unexpected operation: {other:?}"),
        }
    }

    #[test]
    fn test_decode_get_config_with_xpath_filter() {
        let ctx = context();
        let rpc = XmlElement::parse(
            "<rpc message-id=\"3\">\
               <get-config>\
                 <source><running/></source>\
                 <filter type=\"xpath\" \
                  select=\"/conifer-system:system/hostname\"/>\
               </get-config>\
             </rpc>",
        )
        .unwrap();

        let operation =
            decode_operation(&ctx, rpc.children.first().unwrap()).unwrap();
        match operation {
            Operation::GetConfig { source, filter } => {
                assert_eq!(source, Store::Running);
                assert_eq!(
                    filter.as_deref(),
                    Some("/conifer-system:system/hostname")
                );
            }
            other => panic!("unexpected operation: {other:?}"),
        }
    }

    #[test]
    fn test_decode_subtree_filter_unsupported() {
        let ctx = context();
        let rpc = XmlElement::parse(
            "<rpc message-id=\"4\">\
               <get-config>\
                 <source><running/></source>\
                 <filter type=\"subtree\"><system/></filter>\
               </get-config>\
             </rpc>",
        )
        .unwrap();

        let error =
            decode_operation(&ctx, rpc.children.first().unwrap()).unwrap_err();
        assert_eq!(error.tag, ErrorTag::OperationNotSupported);
    }

    #[test]
    fn test_decode_unknown_operation() {
        let ctx = context();
        let rpc = XmlElement::parse(
            "<rpc message-id=\"5\"><frobnicate/></rpc>",
        )
        .unwrap();

        let error =
            decode_operation(&ctx, rpc.children.first().unwrap()).unwrap_err();
        assert_eq!(error.tag, ErrorTag::OperationNotSupported);
    }

    #[test]
    fn test_rpc_reply_rendering() {
        let reply = rpc_reply_ok(Some("7"), Reply::Ok);
        assert_eq!(
            reply,
            "<rpc-reply \
             xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\" \
             message-id=\"7\"><ok/></rpc-reply>"
        );

        let errors = [ErrorRecord::protocol(ErrorTag::InUse, "locked")];
        let reply = rpc_reply_errors(Some("8"), &errors);
        assert!(reply.contains("<error-tag>in-use</error-tag>"));
    }
}
