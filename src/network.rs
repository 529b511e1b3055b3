/// Value units per display coin.
pub const SATS_PER_COIN: u64 = 100_000_000;

/// Supported ledger networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// The bech32 human-readable prefix for addresses on this network.
    pub fn hrp(self) -> &'static str {
        match self {
            Network::Mainnet => "bc",
            Network::Testnet => "tb",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hrp_per_network() {
        assert_eq!(Network::Mainnet.hrp(), "bc");
        assert_eq!(Network::Testnet.hrp(), "tb");
    }

    #[test]
    fn display_names() {
        assert_eq!(Network::Mainnet.to_string(), "mainnet");
        assert_eq!(Network::Testnet.to_string(), "testnet");
    }

    #[test]
    fn sats_per_coin_scale() {
        assert_eq!(SATS_PER_COIN, 100_000_000);
    }
}
