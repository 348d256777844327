use crate::peer::{NodeAddr, PeerConnection, PeerConnector, PeerError};

/// Result of asking a peer whether it is alive and eligible to act as primary or backup.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProbeOutcome {
    Reachable,
    /// Connect or ping failed.
    Unreachable,
    /// The peer answered but is a spare, e.g. a restarted process reusing a dead node's address.
    Ineligible,
}

/// ProbedPeer is a connection opened for the duration of one identification pass. It is closed
/// when dropped.
pub(crate) struct ProbedPeer {
    logger: slog::Logger,
    addr: NodeAddr,
    connection: Result<Box<dyn PeerConnection>, PeerError>,
}

impl ProbedPeer {
    pub(crate) async fn open(logger: &slog::Logger, connector: &dyn PeerConnector, addr: NodeAddr) -> Self {
        let logger = logger.new(slog::o!("Peer" => addr.to_string()));
        let connection = connector.connect(&addr).await;
        if let Err(e) = &connection {
            slog::info!(logger, "Could not connect for probe: {}", e);
        }

        ProbedPeer {
            logger,
            addr,
            connection,
        }
    }

    pub(crate) fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    pub(crate) async fn probe(&mut self) -> ProbeOutcome {
        let connection = match &mut self.connection {
            Ok(c) => c,
            Err(_) => return ProbeOutcome::Unreachable,
        };

        let outcome = match connection.ping().await {
            Ok(true) => ProbeOutcome::Reachable,
            Ok(false) => ProbeOutcome::Ineligible,
            Err(e) => {
                slog::info!(self.logger, "Ping failed: {}", e);
                ProbeOutcome::Unreachable
            }
        };
        slog::debug!(self.logger, "Probe outcome: {:?}", outcome);
        outcome
    }

    /// Asks this peer to send its full map to `me`.
    pub(crate) async fn request_data_transfer(&mut self, me: &NodeAddr) -> Result<(), PeerError> {
        match &mut self.connection {
            Ok(connection) => connection.complete_data_transfer(me.clone()).await,
            Err(e) => Err(PeerError::Connect {
                addr: self.addr.clone(),
                message: e.to_string(),
            }),
        }
    }
}
