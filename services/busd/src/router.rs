//! Message routing and the shared bus facade.
//!
//! The router runs inside each sender's read loop: every complete frame
//! lands in [`Bus::on_frame`], which either handles it (HELLO,
//! LIST_CLIENTS), routes it (unicast via `TO`, broadcast otherwise), or
//! closes the offending connection. The admin HTTP server injects frames
//! through the same facade.
//!
//! Locking discipline: the registry lock is held only long enough to take
//! a snapshot or mutate membership; actual socket writes happen afterwards
//! under each recipient's own write lock. A failed write never removes the
//! recipient here — its own read loop owns that cleanup.

use crate::connection::{ClientId, Connection};
use crate::registry::Registry;
use crate::webhook::WebhookSender;
use bus_protocol::{Args, Value, key, msg};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Broadcast destination that diverts to the webhook instead of fanning out.
const DIVERT_DESTINATION: &str = "discord";
/// Argument naming the broadcast destination.
const PLAYER_KEY: &str = "player";
/// Argument carrying the diverted payload.
const COMM_KEY: &str = "comm";

/// What the read loop should do after a frame has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// Protocol violation; the connection must be closed.
    Close,
}

pub struct Bus {
    registry: Registry,
    webhook: Option<WebhookSender>,
    running: AtomicBool,
    listen_addr: OnceLock<SocketAddr>,
}

impl Bus {
    pub fn new(webhook: Option<WebhookSender>) -> Self {
        Bus {
            registry: Registry::new(),
            webhook,
            running: AtomicBool::new(false),
            listen_addr: OnceLock::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the bound bus address and mark the server running. Called by
    /// the listener once the bind succeeds.
    pub fn mark_listening(&self, addr: SocketAddr) {
        let _ = self.listen_addr.set(addr);
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr.get().copied()
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Greet a freshly accepted connection with its assigned id.
    pub async fn on_connect(&self, conn: &Arc<Connection>) {
        let mut args = Args::new();
        args.insert("yourID".to_owned(), Value::Text(conn.id_string()));
        if !conn.send(msg::HELLO, &args).await {
            warn!(client_id = conn.id(), "failed to send greeting");
        }
    }

    /// Tear down a connection that left the read loop: membership removal
    /// and the LEAVE decision happen in the registry's critical section.
    pub async fn on_disconnect(&self, conn: &Arc<Connection>) {
        let Some((conn, was_identified)) = self.registry.remove(conn.id()).await else {
            return;
        };
        info!(client = %conn.display_name(), peer = conn.peer(), "client disconnected");
        conn.close().await;
        if was_identified {
            let mut args = Args::new();
            args.insert("clientID".to_owned(), Value::Text(conn.id_string()));
            self.broadcast(msg::LEAVE, &args, Some(conn.id())).await;
        }
    }

    /// Close every connection. Used by graceful shutdown; read loops then
    /// observe EOF or the shutdown signal and run their disconnect path.
    pub async fn close_all(&self) {
        self.running.store(false, Ordering::SeqCst);
        for conn in self.registry.snapshot().await {
            conn.close().await;
        }
    }

    // -----------------------------------------------------------------------
    // Frame handling
    // -----------------------------------------------------------------------

    /// Process one complete frame from `conn`'s read loop.
    pub async fn on_frame(
        &self,
        conn: &Arc<Connection>,
        message_id: &str,
        args: Args,
    ) -> Disposition {
        debug!(client = %conn.display_name(), message_id, ?args, "frame received");

        if !conn.is_identified() {
            if message_id == msg::HELLO {
                return self.handle_hello(conn, &args).await;
            }
            warn!(
                client_id = conn.id(),
                message_id, "frame before identification"
            );
            return Disposition::Close;
        }

        match message_id {
            msg::HELLO => {
                warn!(client_id = conn.id(), "duplicate HELLO");
                Disposition::Close
            }
            msg::LIST_CLIENTS => {
                self.handle_list_clients(conn, &args).await;
                Disposition::Continue
            }
            msg::JOIN | msg::LEAVE | msg::DELIVERY_FAILED | msg::CLIENT_NOT_FOUND => {
                warn!(
                    client = %conn.display_name(),
                    message_id, "reserved message id from peer, dropped"
                );
                Disposition::Continue
            }
            _ => {
                self.route(conn, message_id, args).await;
                Disposition::Continue
            }
        }
    }

    async fn handle_hello(&self, conn: &Arc<Connection>, args: &Args) -> Disposition {
        let user_agent = args
            .get("userAgent")
            .map_or_else(|| "Unknown".to_owned(), |v| v.as_text().into_owned());
        let private_only = args.get("privateOnly").is_some_and(Value::is_truthy);

        if !conn.identify(user_agent, private_only) {
            warn!(client_id = conn.id(), "duplicate HELLO");
            return Disposition::Close;
        }
        info!(client = %conn.display_name(), private_only, "client identified");

        let mut join = Args::new();
        join.insert("clientID".to_owned(), Value::Text(conn.id_string()));
        join.insert("name".to_owned(), Value::Text(conn.display_name()));
        join.insert(
            "userAgent".to_owned(),
            Value::Text(conn.user_agent().to_owned()),
        );
        join.insert("host".to_owned(), Value::Text(conn.peer().to_owned()));
        self.broadcast(msg::JOIN, &join, Some(conn.id())).await;
        Disposition::Continue
    }

    /// Reply with one `client<i>` / `clientUserAgent<i>` pair per
    /// identified client (the requester included), in registry order.
    async fn handle_list_clients(&self, conn: &Arc<Connection>, args: &Args) {
        let mut reply = Args::new();
        let mut count: u32 = 0;
        for client in self.registry.snapshot().await {
            if !client.is_identified() {
                continue;
            }
            reply.insert(format!("client{count}"), Value::Text(client.id_string()));
            reply.insert(
                format!("clientUserAgent{count}"),
                Value::Text(client.user_agent().to_owned()),
            );
            count += 1;
        }
        reply.insert("count".to_owned(), Value::Uint(count));
        if let Some(seq) = args.get(key::SEQ) {
            reply.insert(key::SEQ.to_owned(), seq.clone());
        }
        reply.insert(key::IRY.to_owned(), Value::Uint(1));
        conn.send(msg::LIST_CLIENTS, &reply).await;
    }

    /// Routing rules for non-reserved messages from an identified sender.
    async fn route(&self, sender: &Arc<Connection>, message_id: &str, mut args: Args) {
        if let Some(to) = args.get(key::TO).cloned() {
            self.route_unicast(sender, message_id, args, to).await;
            return;
        }

        // Divert before FROM-stamping: a broadcast addressed to the
        // reserved destination goes to the webhook, not to peers.
        if let (Some(webhook), Some(player)) =
            (&self.webhook, args.get(PLAYER_KEY).and_then(Value::as_str))
            && player.eq_ignore_ascii_case(DIVERT_DESTINATION)
        {
            let content = args
                .get(COMM_KEY)
                .map_or_else(String::new, |v| v.as_text().into_owned());
            info!(client = %sender.display_name(), "broadcast diverted to webhook");
            webhook.deliver(content);
            return;
        }

        args.insert(key::FROM.to_owned(), Value::Text(sender.id_string()));
        let delivered = self.broadcast(message_id, &args, Some(sender.id())).await;
        debug!(
            client = %sender.display_name(),
            message_id, delivered, "broadcast routed"
        );
    }

    async fn route_unicast(
        &self,
        sender: &Arc<Connection>,
        message_id: &str,
        mut args: Args,
        to: Value,
    ) {
        args.insert(key::FROM.to_owned(), Value::Text(sender.id_string()));
        let seq = args.get(key::SEQ).cloned();

        let recipient = match to.as_str() {
            Some(id_str) => self.registry.lookup(id_str).await,
            None => None,
        };
        match recipient {
            None => {
                debug!(client = %sender.display_name(), target = %to, "unicast target not found");
                self.reply(sender, msg::CLIENT_NOT_FOUND, to, seq).await;
            }
            Some(recipient) => {
                if recipient.send(message_id, &args).await {
                    debug!(
                        client = %sender.display_name(),
                        recipient = %recipient.display_name(),
                        message_id, "unicast delivered"
                    );
                } else {
                    warn!(
                        client = %sender.display_name(),
                        recipient = %recipient.display_name(),
                        message_id, "unicast delivery failed"
                    );
                    self.reply(sender, msg::DELIVERY_FAILED, to, seq).await;
                }
            }
        }
    }

    /// Send a router-generated reply: `{clientID, SEQ?, IRY=1}`.
    async fn reply(
        &self,
        to_conn: &Arc<Connection>,
        reply_id: &str,
        client_id: Value,
        seq: Option<Value>,
    ) {
        let mut args = Args::new();
        args.insert("clientID".to_owned(), client_id);
        if let Some(seq) = seq {
            args.insert(key::SEQ.to_owned(), seq);
        }
        args.insert(key::IRY.to_owned(), Value::Uint(1));
        to_conn.send(reply_id, &args).await;
    }

    // -----------------------------------------------------------------------
    // Fan-out and admin injection
    // -----------------------------------------------------------------------

    /// Deliver to every identified, non-private connection except
    /// `exclude`. Returns the number of successful deliveries. Failed
    /// recipients are cleaned up by their own read loops.
    pub async fn broadcast(&self, message_id: &str, args: &Args, exclude: Option<ClientId>) -> usize {
        let mut delivered = 0;
        for client in self.registry.snapshot().await {
            if Some(client.id()) == exclude || !client.is_identified() || client.private_only() {
                continue;
            }
            if client.send(message_id, args).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Admin-injected broadcast: no FROM stamp, no divert evaluation, every
    /// eligible recipient.
    pub async fn inject_broadcast(&self, message_id: &str, args: &Args) -> usize {
        self.broadcast(message_id, args, None).await
    }

    /// Admin-injected unicast. Only identified recipients are addressable;
    /// unknown, unidentified, and undeliverable all report false.
    pub async fn inject_message(&self, client_id: &str, message_id: &str, args: &Args) -> bool {
        match self.registry.lookup(client_id).await {
            Some(conn) if conn.is_identified() => conn.send(message_id, args).await,
            _ => false,
        }
    }
}
