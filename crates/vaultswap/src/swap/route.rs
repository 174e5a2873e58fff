use crate::{
    chains::evm::RouterLeg,
    errors::SwapError,
    network::{Network, QuoteStrategy, TokenDescriptor},
};
use alloy::primitives::Address;

/// Router execution of a single-hop pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterRoute {
    pub router: Address,
    pub leg: RouterLeg,
    /// Source first. Native legs appear as the wrapped contract.
    pub path: [Address; 2],
    /// Deposit native into the wrapped contract before swapping.
    pub wrap_input: bool,
    /// Withdraw the wrapped output back to native after swapping.
    pub unwrap_output: bool,
}

impl RouterRoute {
    /// The contract token the router must be allowed to pull, if any.
    pub const fn approve_token(&self) -> Option<Address> {
        match self.leg {
            RouterLeg::NativeIn => None,
            RouterLeg::NativeOut | RouterLeg::TokenToToken => Some(self.path[0]),
        }
    }
}

/// Aggregator execution. Native legs use the aggregator's sentinel address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorRoute {
    pub input: Address,
    pub output: Address,
    pub native_in: bool,
    pub expected_router: Option<Address>,
}

impl AggregatorRoute {
    pub const fn approve_token(&self) -> Option<Address> {
        if self.native_in {
            None
        } else {
            Some(self.input)
        }
    }
}

/// How a validated pair is executed on its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Router(RouterRoute),
    Aggregator(AggregatorRoute),
}

fn router_side(network: &Network, t: &TokenDescriptor) -> Result<Address, SwapError> {
    match t.contract_address() {
        Some(a) => Ok(a),
        None => network.tokens.wrapped_address(),
    }
}

pub fn plan_route(
    network: &Network,
    from: &TokenDescriptor,
    to: &TokenDescriptor,
) -> Result<Route, SwapError> {
    if from.symbol == to.symbol {
        return Err(SwapError::InvalidRequest(format!(
            "cannot swap {} for itself",
            from.symbol
        )));
    }

    let wrapped = network.tokens.wrapped_address()?;
    let is_native_wrapped_pair = (from.is_native() && to.contract_address() == Some(wrapped))
        || (to.is_native() && from.contract_address() == Some(wrapped));
    if is_native_wrapped_pair {
        return Err(SwapError::InvalidRequest(format!(
            "{} and {} are the same asset; wrap or unwrap instead of swapping",
            from.symbol, to.symbol
        )));
    }

    match network.strategy {
        QuoteStrategy::Router {
            address,
            native_entrypoints,
        } => {
            let path = [router_side(network, from)?, router_side(network, to)?];
            let (leg, wrap_input, unwrap_output) = if native_entrypoints {
                let leg = if from.is_native() {
                    RouterLeg::NativeIn
                } else if to.is_native() {
                    RouterLeg::NativeOut
                } else {
                    RouterLeg::TokenToToken
                };
                (leg, false, false)
            } else {
                (RouterLeg::TokenToToken, from.is_native(), to.is_native())
            };
            Ok(Route::Router(RouterRoute {
                router: address,
                leg,
                path,
                wrap_input,
                unwrap_output,
            }))
        }
        QuoteStrategy::Aggregator {
            native_sentinel,
            expected_router,
        } => Ok(Route::Aggregator(AggregatorRoute {
            input: from.contract_address().unwrap_or(native_sentinel),
            output: to.contract_address().unwrap_or(native_sentinel),
            native_in: from.is_native(),
            expected_router,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::VaultswapConfig, network::NetworkRegistry};

    fn plan(net: &str, from: &str, to: &str) -> eyre::Result<Result<Route, SwapError>> {
        let reg = NetworkRegistry::from_config(&VaultswapConfig::default())?;
        let n = reg.get(net)?;
        Ok(plan_route(n, n.tokens.resolve(from)?, n.tokens.resolve(to)?))
    }

    #[test]
    fn ethereum_uses_native_entrypoints() -> eyre::Result<()> {
        let Route::Router(r) = plan("ethereum", "ETH", "USDC")?? else {
            eyre::bail!("expected router route");
        };
        assert_eq!(r.leg, RouterLeg::NativeIn);
        assert!(!r.wrap_input && !r.unwrap_output);
        assert_eq!(r.approve_token(), None, "native input needs no approval");

        let Route::Router(r) = plan("base", "USDT", "ETH")?? else {
            eyre::bail!("expected router route");
        };
        assert_eq!(r.leg, RouterLeg::NativeOut);
        assert!(r.approve_token().is_some());
        Ok(())
    }

    #[test]
    fn polygon_wraps_and_unwraps_around_token_swap() -> eyre::Result<()> {
        let reg = NetworkRegistry::from_config(&VaultswapConfig::default())?;
        let wpol = reg.get("polygon")?.tokens.wrapped_address()?;

        let Route::Router(r) = plan("polygon", "POL", "USDC")?? else {
            eyre::bail!("expected router route");
        };
        assert_eq!(r.leg, RouterLeg::TokenToToken);
        assert_eq!(r.path[0], wpol);
        assert!(r.wrap_input && !r.unwrap_output);
        assert_eq!(r.approve_token(), Some(wpol), "wrapped input must be approved");

        let Route::Router(r) = plan("polygon", "USDC", "POL")?? else {
            eyre::bail!("expected router route");
        };
        assert!(!r.wrap_input && r.unwrap_output);
        assert_eq!(r.path[1], wpol);
        Ok(())
    }

    #[test]
    fn aggregator_uses_sentinel_for_native() -> eyre::Result<()> {
        let Route::Aggregator(r) = plan("sonic", "SONIC", "USDC")?? else {
            eyre::bail!("expected aggregator route");
        };
        assert_eq!(r.input, Address::ZERO);
        assert!(r.native_in);
        assert_eq!(r.approve_token(), None);

        let Route::Aggregator(r) = plan("sonic", "USDC", "WS")?? else {
            eyre::bail!("expected aggregator route");
        };
        assert!(r.approve_token().is_some(), "token input must be approved");
        Ok(())
    }

    #[test]
    fn same_asset_pairs_are_invalid() -> eyre::Result<()> {
        assert!(matches!(
            plan("ethereum", "USDC", "USDC")?,
            Err(SwapError::InvalidRequest(_))
        ));
        assert!(matches!(
            plan("ethereum", "ETH", "WETH")?,
            Err(SwapError::InvalidRequest(_))
        ));
        assert!(matches!(
            plan("polygon", "WPOL", "POL")?,
            Err(SwapError::InvalidRequest(_))
        ));
        Ok(())
    }
}
