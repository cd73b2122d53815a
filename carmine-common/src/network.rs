//! Network type for Carmine configuration.

/// Network type for Carmine configuration.
///
/// Controls address decoding: base58check version bytes for legacy
/// pay-to-hash outputs and the human-readable part for segwit outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Mainnet network
    Mainnet,
    /// Testnet network
    Testnet,
    /// Regtest network (for local testing)
    Regtest,
}

impl Network {
    /// Base58check version byte for pay-to-pubkey-hash addresses.
    pub fn p2pkh_version(&self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet | Network::Regtest => 0x6f,
        }
    }

    /// Base58check version byte for pay-to-script-hash addresses.
    pub fn p2sh_version(&self) -> u8 {
        match self {
            Network::Mainnet => 0x05,
            Network::Testnet | Network::Regtest => 0xc4,
        }
    }

    /// Bech32 human-readable part for segwit addresses.
    pub fn bech32_hrp(&self) -> &'static str {
        match self {
            Network::Mainnet => "bc",
            Network::Testnet => "tb",
            Network::Regtest => "bcrt",
        }
    }

    /// The name bitcoind reports in `getblockchaininfo.chain`.
    pub fn chain_name(&self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Network::Testnet
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.chain_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_bytes_differ_per_network() {
        assert_eq!(Network::Mainnet.p2pkh_version(), 0x00);
        assert_eq!(Network::Testnet.p2pkh_version(), 0x6f);
        assert_eq!(Network::Mainnet.p2sh_version(), 0x05);
        assert_eq!(Network::Regtest.bech32_hrp(), "bcrt");
    }

    #[test]
    fn serde_round_trip() {
        let json = serde_json::to_string(&Network::Regtest).unwrap();
        assert_eq!(json, "\"regtest\"");
        let back: Network = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Network::Regtest);
    }
}
