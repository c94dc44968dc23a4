//! The hub owns the registry of connected clients.
//!
//! Every registration, departure and broadcast goes through one command
//! channel and is applied by one task, so all clients observe the same order
//! of events. The hub never waits on a client: fan-out is `try_send` into each
//! client's bounded queue.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatroom_core::{Message, Username};
use chatroom_store::MessageStore;

use crate::client::{Client, Payload};

/// What a client needs from the hub.
#[async_trait]
pub trait HubPort: Send + Sync {
    async fn register(&self, client: Arc<Client>);
    async fn unregister(&self, client: Arc<Client>);
    async fn broadcast(&self, payload: Payload);
}

pub enum HubCommand {
    Register(Arc<Client>),
    Unregister(Arc<Client>),
    Broadcast(Payload),
    /// Sorted usernames currently registered.
    Roster(oneshot::Sender<Vec<String>>),
}

/// Cloneable sender side of the hub.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    async fn send(&self, command: HubCommand) {
        if self.tx.send(command).await.is_err() {
            debug!("hub stopped, command dropped");
        }
    }

    /// Usernames currently registered, sorted. Empty if the hub has stopped.
    pub async fn roster(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Roster(reply)).await;
        rx.await.unwrap_or_default()
    }
}

#[async_trait]
impl HubPort for HubHandle {
    async fn register(&self, client: Arc<Client>) {
        self.send(HubCommand::Register(client)).await;
    }

    async fn unregister(&self, client: Arc<Client>) {
        self.send(HubCommand::Unregister(client)).await;
    }

    async fn broadcast(&self, payload: Payload) {
        self.send(HubCommand::Broadcast(payload)).await;
    }
}

pub struct Hub {
    clients: BTreeMap<Username, Arc<Client>>,
    store: Arc<dyn MessageStore>,
    history_limit: usize,
    rx: mpsc::Receiver<HubCommand>,
}

impl Hub {
    pub fn new(
        store: Arc<dyn MessageStore>,
        history_limit: usize,
        capacity: usize,
    ) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let hub = Self {
            clients: BTreeMap::new(),
            store,
            history_limit,
            rx,
        };
        (hub, HubHandle { tx })
    }

    /// Process commands with no external stop signal.
    ///
    /// Every registered client holds a handle, so this returns only after all
    /// clients have unregistered and every other handle is dropped. The
    /// server stops the hub through [`Hub::run_until`].
    pub async fn run(self) {
        self.run_until(CancellationToken::new()).await;
    }

    /// Process commands until every handle is dropped or `shutdown` fires.
    /// On shutdown every registered client is closed.
    pub async fn run_until(mut self, shutdown: CancellationToken) {
        info!(history_limit = self.history_limit, "hub started");
        loop {
            let command = tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command);
        }

        for client in self.clients.values() {
            client.close();
        }
        info!(remaining = self.clients.len(), "hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(client) => self.register(client),
            HubCommand::Unregister(client) => self.unregister(&client),
            HubCommand::Broadcast(payload) => self.broadcast(payload),
            HubCommand::Roster(reply) => {
                let _ = reply.send(self.usernames());
            }
        }
    }

    fn register(&mut self, client: Arc<Client>) {
        let username = client.username().clone();

        if self.clients.contains_key(&username) {
            warn!(username = %username, conn_id = %client.id(), "username already taken");
            let error = Message::error(format!(
                "username \"{username}\" is already taken, please choose another"
            ));
            if let Some(payload) = encode(&error) {
                client.enqueue(payload);
            }
            client.close();
            return;
        }

        self.clients.insert(username.clone(), Arc::clone(&client));
        client.start();
        info!(username = %username, conn_id = %client.id(), clients = self.clients.len(), "client joined");

        match self.store.fetch_recent(self.history_limit) {
            Ok(history) => {
                for message in &history {
                    if let Some(payload) = encode(message) {
                        client.enqueue(payload);
                    }
                }
                debug!(username = %username, replayed = history.len(), "history sent");
            }
            Err(e) => warn!(username = %username, error = %e, "failed to load history"),
        }

        let join = Message::join(&username);
        self.persist(&join);
        if let Some(payload) = encode(&join) {
            for (name, other) in &self.clients {
                if *name != username {
                    other.enqueue(Arc::clone(&payload));
                }
            }
        }

        self.send_user_list();
    }

    fn unregister(&mut self, client: &Arc<Client>) {
        let username = client.username();
        match self.clients.get(username) {
            Some(current) if current.id() == client.id() => {}
            Some(_) => {
                debug!(username = %username, conn_id = %client.id(), "stale unregister ignored");
                return;
            }
            None => {
                debug!(username = %username, conn_id = %client.id(), "unregister for unknown client");
                return;
            }
        }

        self.clients.remove(username);
        client.close();
        info!(username = %username, conn_id = %client.id(), clients = self.clients.len(), "client left");

        let leave = Message::leave(username);
        self.persist(&leave);
        if let Some(payload) = encode(&leave) {
            self.fan_out(&payload);
        }

        self.send_user_list();
    }

    fn broadcast(&mut self, payload: Payload) {
        match Message::from_json(&payload) {
            Ok(message) if message.kind().is_persistable() => self.persist(&message),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "broadcast payload is not a message, forwarding anyway"),
        }
        self.fan_out(&payload);
    }

    fn fan_out(&self, payload: &Payload) {
        for client in self.clients.values() {
            client.enqueue(Arc::clone(payload));
        }
    }

    fn persist(&self, message: &Message) {
        if let Err(e) = self.store.append(message) {
            warn!(kind = %message.kind(), error = %e, "failed to persist message");
        }
    }

    fn usernames(&self) -> Vec<String> {
        // BTreeMap keys iterate in sorted order.
        self.clients.keys().map(ToString::to_string).collect()
    }

    fn send_user_list(&self) {
        let users = self.usernames();
        debug!(users = ?users, "broadcasting user list");
        if let Some(payload) = encode(&Message::user_list(users)) {
            self.fan_out(&payload);
        }
    }
}

fn encode(message: &Message) -> Option<Payload> {
    match message.to_json() {
        Ok(json) => Some(Payload::from(json)),
        Err(e) => {
            warn!(kind = %message.kind(), error = %e, "failed to encode message");
            None
        }
    }
}
