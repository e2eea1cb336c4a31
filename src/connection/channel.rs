//! A multiplexed virtual connection over a [`super::Connection`] (spec
//! §3 Channel).

use crate::error::{ChannelSubcategory, Error};
use lapin::options::ConfirmSelectOptions;
use lapin::{Channel as LapinChannel, Connection as LapinConnection};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Publishes complete immediately from the client's view.
    Plain,
    /// The broker sends per-publish ack/nack; the channel maintains an
    /// ordered set of unconfirmed delivery tags.
    Confirm,
}

struct Unconfirmed {
    tags: BTreeSet<u64>,
}

/// Wraps a `lapin::Channel` with the mode semantics from spec §3.
/// Invariant: after channel close or error, outstanding unconfirmed
/// deliveries are reported as failed; the channel is not reused.
pub struct Channel {
    inner: LapinChannel,
    mode: ChannelMode,
    unconfirmed: Mutex<Unconfirmed>,
    poisoned: Arc<AtomicBool>,
    asserted_exchanges: Mutex<std::collections::HashSet<String>>,
}

impl Channel {
    pub async fn open(conn: &LapinConnection, mode: ChannelMode) -> Result<Self, Error> {
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| Error::Channel { subcategory: ChannelSubcategory::CreationFailed, message: e.to_string() })?;

        if mode == ChannelMode::Confirm {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| Error::Channel { subcategory: ChannelSubcategory::CreationFailed, message: e.to_string() })?;
        }

        let poisoned = Arc::new(AtomicBool::new(false));
        let poisoned_clone = Arc::clone(&poisoned);
        channel.on_error(move |_err| {
            poisoned_clone.store(true, Ordering::SeqCst);
        });

        Ok(Self {
            inner: channel,
            mode,
            unconfirmed: Mutex::new(Unconfirmed { tags: BTreeSet::new() }),
            poisoned,
            asserted_exchanges: Mutex::new(std::collections::HashSet::new()),
        })
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn lapin(&self) -> &LapinChannel {
        &self.inner
    }

    pub fn is_usable(&self) -> bool {
        !self.poisoned.load(Ordering::SeqCst) && self.inner.status().connected()
    }

    /// Ensures `exchange` is asserted at most once per channel lifetime
    /// (spec §8 quantified invariant). Returns whether this call
    /// performed the assert (`true`) or found it already done (`false`).
    pub async fn mark_exchange_asserted(&self, exchange: &str) -> bool {
        let mut asserted = self.asserted_exchanges.lock().await;
        asserted.insert(exchange.to_string())
    }

    pub async fn track_unconfirmed(&self, tag: u64) {
        self.unconfirmed.lock().await.tags.insert(tag);
    }

    pub async fn confirm(&self, tag: u64) {
        self.unconfirmed.lock().await.tags.remove(&tag);
    }

    /// Reports every still-outstanding unconfirmed delivery as failed
    /// (e.g. on channel close) and clears the set.
    pub async fn fail_all_unconfirmed(&self) -> Vec<u64> {
        let mut unconfirmed = self.unconfirmed.lock().await;
        unconfirmed.tags.drain().collect()
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.fail_all_unconfirmed().await;
        self.inner
            .close(200, "closed by application")
            .await
            .map_err(|e| Error::Channel { subcategory: ChannelSubcategory::Closed, message: e.to_string() })
    }
}
