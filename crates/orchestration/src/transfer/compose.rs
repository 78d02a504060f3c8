// Route construction without network access

use std::collections::HashSet;
use tracing::debug;

use super::{SwapArgs, SwapRequest, TransferData, TransferMsg};
use crate::config::TransferConfig;
use crate::error::{OrchestrationError, Result};
use crate::types::ChainAddress;

/// Builds and validates `TransferMsg` routes
#[derive(Debug, Clone)]
pub struct TransferComposer {
    max_hops: usize,
    swap_venue: Option<ChainAddress>,
}

impl TransferComposer {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            max_hops: config.max_hops,
            swap_venue: config.swap_venue.clone(),
        }
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Single hop to `destination`
    pub fn make_transfer_msg(&self, destination: ChainAddress) -> TransferMsg {
        TransferMsg::new(destination)
    }

    /// Chain `steps` so each step's last hop continues with the following step
    pub fn make_sequence(&self, steps: impl IntoIterator<Item = TransferMsg>) -> Result<TransferMsg> {
        let mut steps: Vec<TransferMsg> = steps.into_iter().collect();
        let total: usize = steps.iter().map(TransferMsg::hop_count).sum();
        if total > self.max_hops {
            return Err(OrchestrationError::validation(format!(
                "route has {} hops, limit is {}",
                total, self.max_hops
            )));
        }

        let mut route = steps
            .pop()
            .ok_or_else(|| OrchestrationError::validation("a transfer sequence needs at least one step"))?;
        while let Some(step) = steps.pop() {
            route = step.then(route);
        }

        self.validate(&route)?;
        debug!("Composed route of {} hops", route.hop_count());
        Ok(route)
    }

    /// Send `amount_in` to the swap venue; proceeds continue to `after` when given
    pub fn make_swap(&self, request: SwapRequest) -> Result<TransferMsg> {
        let args = SwapArgs::try_from(request)?;
        let venue = self
            .swap_venue
            .clone()
            .ok_or_else(|| OrchestrationError::validation("no swap venue configured"))?;

        let after = args.after.clone();
        let mut msg = TransferMsg::new(venue).with_data(TransferData::Swap(args));
        if let Some(destination) = after {
            msg = msg.then(TransferMsg::new(destination));
        }

        self.validate(&msg)?;
        Ok(msg)
    }

    /// Reject routes over the hop bound or revisiting a destination
    pub fn validate(&self, msg: &TransferMsg) -> Result<()> {
        let mut seen = HashSet::new();
        for (index, hop) in msg.hops().enumerate() {
            if index >= self.max_hops {
                return Err(OrchestrationError::validation(format!(
                    "route exceeds {} hops",
                    self.max_hops
                )));
            }
            if !seen.insert(hop.to_account()) {
                return Err(OrchestrationError::validation(format!(
                    "route revisits {}",
                    hop.to_account()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{Ratio, SwapOutput};
    use crate::types::{Brand, ChainAmount};

    fn addr(chain_id: &str, prefix: &str, byte: u8) -> ChainAddress {
        ChainAddress::from_bytes(chain_id, prefix, &[byte; 20]).unwrap()
    }

    fn composer() -> TransferComposer {
        TransferComposer::new(&TransferConfig {
            swap_venue: Some(addr("osmosis-1", "osmo", 0xAA)),
            ..TransferConfig::default()
        })
    }

    #[test]
    fn test_sequence_links() {
        let composer = composer();
        let steps: Vec<_> = (1..=5)
            .map(|i| composer.make_transfer_msg(addr("celestia", "celestia", i)))
            .collect();

        let route = composer.make_sequence(steps).unwrap();
        assert_eq!(route.hop_count(), 5);
        assert_eq!(route.links(), 4);
    }

    #[test]
    fn test_sequence_over_bound() {
        let composer = composer();
        let steps: Vec<_> = (1..=9)
            .map(|i| composer.make_transfer_msg(addr("celestia", "celestia", i)))
            .collect();
        assert!(matches!(
            composer.make_sequence(steps),
            Err(OrchestrationError::Validation(_))
        ));
    }

    #[test]
    fn test_sequence_rejects_loops() {
        let composer = composer();
        let a = addr("osmosis-1", "osmo", 1);
        let b = addr("celestia", "celestia", 2);
        let err = composer
            .make_sequence(vec![
                composer.make_transfer_msg(a.clone()),
                composer.make_transfer_msg(b),
                composer.make_transfer_msg(a),
            ])
            .unwrap_err();
        assert!(err.to_string().contains("revisits"));
    }

    #[test]
    fn test_empty_sequence() {
        assert!(composer().make_sequence(Vec::new()).is_err());
    }

    #[test]
    fn test_swap_with_after() {
        let composer = composer();
        let destination = addr("celestia", "celestia", 7);
        let msg = composer
            .make_swap(SwapRequest {
                amount_in: Some(ChainAmount::new("uusdc", 1_000)),
                brand_out: Some(Brand::new("TIA")),
                max_slippage: Some(Ratio::percent(3).unwrap()),
                after: Some(destination.clone()),
                ..SwapRequest::default()
            })
            .unwrap();

        assert_eq!(msg.to_account(), &addr("osmosis-1", "osmo", 0xAA));
        assert_eq!(msg.next().map(|n| n.to_account()), Some(&destination));
        let args = msg.swap_args().unwrap();
        assert!(matches!(args.output, SwapOutput::MaxSlippage { .. }));
    }

    #[test]
    fn test_swap_needs_venue() {
        let composer = TransferComposer::new(&TransferConfig::default());
        let err = composer
            .make_swap(SwapRequest {
                amount_in: Some(ChainAmount::new("uusdc", 1)),
                amount_out: Some(ChainAmount::new("utia", 1)),
                ..SwapRequest::default()
            })
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));
    }
}
