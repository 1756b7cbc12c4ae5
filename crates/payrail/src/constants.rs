use serde::Serialize;

/// Card checkout sessions are honored for 24 hours.
pub const CARD_PAYMENT_TTL_SECS: i64 = 24 * 60 * 60;

/// Crypto-exchange orders close after one hour.
pub const EXCHANGE_PAYMENT_TTL_SECS: i64 = 60 * 60;

/// On-chain payments must land within 15 minutes.
pub const ONCHAIN_PAYMENT_TTL_SECS: i64 = 15 * 60;

/// Default lifetime of a price quote.
pub const DEFAULT_QUOTE_TTL_SECS: i64 = 900;

/// Default block depth before an on-chain payment is final.
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u64 = 3;

/// Duration of a `premium_access` entitlement.
pub const PREMIUM_ACCESS_SECS: i64 = 30 * 24 * 60 * 60;

pub const DEFAULT_CARD_API_URL: &str = "https://api.stripe.com";
pub const DEFAULT_EXCHANGE_API_URL: &str = "https://bpay.binanceapi.com";

/// Default tolerance for card webhook timestamps.
pub const DEFAULT_CARD_WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// EVM networks accepted for direct transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Ethereum,
    Bsc,
    Polygon,
    Sepolia,
    PolygonAmoy,
}

impl Network {
    pub const ALL: [Network; 5] = [
        Network::Ethereum,
        Network::Bsc,
        Network::Polygon,
        Network::Sepolia,
        Network::PolygonAmoy,
    ];

    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.chain_id() == chain_id)
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Bsc => 56,
            Network::Polygon => 137,
            Network::Sepolia => 11_155_111,
            Network::PolygonAmoy => 80_002,
        }
    }

    /// Config key segment, e.g. `onchain.recipient.polygon_amoy`.
    pub fn key(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Bsc => "bsc",
            Network::Polygon => "polygon",
            Network::Sepolia => "sepolia",
            Network::PolygonAmoy => "polygon_amoy",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Network::Ethereum => "Ethereum Mainnet",
            Network::Bsc => "BNB Smart Chain",
            Network::Polygon => "Polygon Mainnet",
            Network::Sepolia => "Sepolia Testnet",
            Network::PolygonAmoy => "Polygon Amoy Testnet",
        }
    }

    /// Native token symbol, which is also the quote currency for the chain.
    pub fn symbol(&self) -> &'static str {
        match self {
            Network::Ethereum | Network::Sepolia => "ETH",
            Network::Bsc => "BNB",
            Network::Polygon | Network::PolygonAmoy => "MATIC",
        }
    }

    /// All supported natives use 18 decimals.
    pub fn decimals(&self) -> u32 {
        18
    }

    pub fn is_testnet(&self) -> bool {
        matches!(self, Network::Sepolia | Network::PolygonAmoy)
    }

    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Ethereum => "https://ethereum-rpc.publicnode.com",
            Network::Bsc => "https://bsc-dataseed.binance.org",
            Network::Polygon => "https://polygon-rpc.com",
            Network::Sepolia => "https://ethereum-sepolia-rpc.publicnode.com",
            Network::PolygonAmoy => "https://rpc-amoy.polygon.technology",
        }
    }

    pub fn explorer_base(&self) -> &'static str {
        match self {
            Network::Ethereum => "https://etherscan.io",
            Network::Bsc => "https://bscscan.com",
            Network::Polygon => "https://polygonscan.com",
            Network::Sepolia => "https://sepolia.etherscan.io",
            Network::PolygonAmoy => "https://amoy.polygonscan.com",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_ids_round_trip() {
        for network in Network::ALL {
            assert_eq!(Network::from_chain_id(network.chain_id()), Some(network));
        }
        assert_eq!(Network::from_chain_id(10), None);
    }

    #[test]
    fn sepolia_quotes_in_eth() {
        let sepolia = Network::from_chain_id(11_155_111).unwrap();
        assert_eq!(sepolia.symbol(), "ETH");
        assert!(sepolia.is_testnet());
    }
}
