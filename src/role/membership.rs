use crate::coordination::{CoordinationError, Coordinator, MembershipWatch};
use crate::peer::{NodeAddr, ParseNodeAddrError};
use std::sync::Arc;
use tokio::time::Duration;

/// MembershipView is the list of live nodes ordered by join sequence. The first entry is the
/// presumptive primary regardless of the role it reports.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MembershipView {
    entries: Vec<MemberEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MemberEntry {
    pub(crate) name: String,
    pub(crate) addr: NodeAddr,
}

impl MembershipView {
    /// Sorts `entries` by name, which ensemble sequence suffixes make equivalent to join order.
    pub(crate) fn new(mut entries: Vec<MemberEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        MembershipView { entries }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&self, position: usize) -> Option<&MemberEntry> {
        self.entries.get(position)
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum MembershipError {
    #[error(transparent)]
    Coordination(#[from] CoordinationError),
    #[error("Membership list is empty")]
    Empty,
    #[error("Entry '{name}' has a non UTF-8 payload")]
    NonUtf8Payload { name: String },
    #[error("Entry '{name}' has a malformed payload: {source}")]
    MalformedPayload {
        name: String,
        #[source]
        source: ParseNodeAddrError,
    },
}

/// MembershipReader fetches a fresh `MembershipView` and reinstalls the change watch.
pub(crate) struct MembershipReader {
    logger: slog::Logger,
    coordinator: Arc<dyn Coordinator>,
    root: String,
    retry_delay: Duration,
}

impl MembershipReader {
    pub(crate) fn new(
        logger: slog::Logger,
        coordinator: Arc<dyn Coordinator>,
        root: String,
        retry_delay: Duration,
    ) -> Self {
        MembershipReader {
            logger,
            coordinator,
            root,
            retry_delay,
        }
    }

    /// `fetch()` retries with a fixed delay until it gets a non-empty view. It only gives up, with
    /// `None`, once the coordination session is closed.
    pub(crate) async fn fetch(&self) -> Option<(MembershipView, MembershipWatch)> {
        loop {
            match self.try_fetch().await {
                Ok(fetched) => return Some(fetched),
                Err(MembershipError::Coordination(CoordinationError::Closed)) => {
                    slog::info!(self.logger, "Coordination session closed. Stopping membership reads.");
                    return None;
                }
                Err(MembershipError::Empty) => {
                    // Our own entry is not visible yet.
                    slog::debug!(self.logger, "Empty membership list, retrying in {:?}", self.retry_delay);
                }
                Err(e) => {
                    slog::warn!(self.logger, "Membership read failed, retrying in {:?}: {}", self.retry_delay, e);
                }
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn try_fetch(&self) -> Result<(MembershipView, MembershipWatch), MembershipError> {
        self.coordinator.sync(&self.root).await?;
        let (children, watch) = self.coordinator.watch_children(&self.root).await?;
        if children.is_empty() {
            return Err(MembershipError::Empty);
        }

        let mut entries = Vec::with_capacity(children.len());
        for name in children {
            let payload = self.coordinator.data(&self.root, &name).await?;
            let addr = parse_payload(&name, payload)?;
            entries.push(MemberEntry { name, addr });
        }

        Ok((MembershipView::new(entries), watch))
    }
}

fn parse_payload(name: &str, payload: Vec<u8>) -> Result<NodeAddr, MembershipError> {
    let text = String::from_utf8(payload).map_err(|_| MembershipError::NonUtf8Payload { name: name.to_string() })?;
    text.parse().map_err(|source| MembershipError::MalformedPayload {
        name: name.to_string(),
        source,
    })
}
