use std::convert::TryFrom;
use tokio::time::Duration;

/// Tunables of a storage node. Unset fields take their defaults.
#[derive(Clone, Debug, Default)]
pub struct NodeOptions {
    /// Idle connections kept to the backup. Default 20.
    pub connection_pool_size: Option<usize>,
    /// Entries per SetMap batch during a full transfer. Default 100,000.
    pub transfer_batch_size: Option<usize>,
    /// Delay between attempts to read the membership list. Default 200ms.
    pub membership_retry_delay: Option<Duration>,
    pub rpc_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

#[derive(Debug)]
pub(super) struct NodeOptionsValidated {
    pub connection_pool_size: usize,
    pub transfer_batch_size: usize,
    pub membership_retry_delay: Duration,
    pub rpc_timeout: Duration,
    pub connect_timeout: Duration,
}

impl NodeOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.connection_pool_size == 0 {
            return Err("Connection pool size must be positive");
        }
        if self.transfer_batch_size == 0 {
            return Err("Transfer batch size must be positive");
        }
        if self.membership_retry_delay == Duration::from_secs(0) {
            return Err("Membership retry delay must be positive");
        }
        if self.rpc_timeout == Duration::from_secs(0) || self.connect_timeout == Duration::from_secs(0) {
            return Err("RPC and connect timeouts must be positive");
        }

        Ok(())
    }
}

impl TryFrom<NodeOptions> for NodeOptionsValidated {
    type Error = &'static str;

    fn try_from(options: NodeOptions) -> Result<Self, Self::Error> {
        let values = NodeOptionsValidated {
            connection_pool_size: options.connection_pool_size.unwrap_or(20),
            transfer_batch_size: options.transfer_batch_size.unwrap_or(100_000),
            membership_retry_delay: options.membership_retry_delay.unwrap_or(Duration::from_millis(200)),
            rpc_timeout: options.rpc_timeout.unwrap_or(Duration::from_secs(2)),
            connect_timeout: options.connect_timeout.unwrap_or(Duration::from_secs(1)),
        };

        values.validate()?;
        Ok(values)
    }
}
