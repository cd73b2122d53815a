//! Locking-script classification and address extraction.
//!
//! Recognizes the standard pay-to-address script templates and derives the
//! address strings an output pays to under a given network. Outputs whose
//! script matches no template yield an empty address set and are not
//! indexed.

use carmine_common::Network;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

const OP_0: u8 = 0x00;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;
const OP_DUP: u8 = 0x76;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_HASH160: u8 = 0xa9;
const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKMULTISIG: u8 = 0xae;

/// The recognized standard script templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptClass {
    /// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
    P2Pkh([u8; 20]),
    /// `OP_HASH160 <20> OP_EQUAL`
    P2Sh([u8; 20]),
    /// `<pubkey> OP_CHECKSIG`
    P2Pk(Vec<u8>),
    /// `OP_m <pubkey>... OP_n OP_CHECKMULTISIG`
    Multisig(Vec<Vec<u8>>),
    /// `OP_0 <20>`
    P2Wpkh([u8; 20]),
    /// `OP_0 <32>`
    P2Wsh([u8; 32]),
    /// Anything else; not indexed.
    NonStandard,
}

/// Classifies a locking script against the standard templates.
pub fn classify(script: &[u8]) -> ScriptClass {
    match script {
        [OP_DUP, OP_HASH160, 20, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] if hash.len() == 20 => {
            let mut array = [0u8; 20];
            array.copy_from_slice(hash);
            ScriptClass::P2Pkh(array)
        }
        [OP_HASH160, 20, hash @ .., OP_EQUAL] if hash.len() == 20 => {
            let mut array = [0u8; 20];
            array.copy_from_slice(hash);
            ScriptClass::P2Sh(array)
        }
        [OP_0, 20, program @ ..] if program.len() == 20 => {
            let mut array = [0u8; 20];
            array.copy_from_slice(program);
            ScriptClass::P2Wpkh(array)
        }
        [OP_0, 32, program @ ..] if program.len() == 32 => {
            let mut array = [0u8; 32];
            array.copy_from_slice(program);
            ScriptClass::P2Wsh(array)
        }
        [len, pubkey @ .., OP_CHECKSIG]
            if (*len == 33 || *len == 65) && pubkey.len() == *len as usize =>
        {
            ScriptClass::P2Pk(pubkey.to_vec())
        }
        _ => classify_multisig(script),
    }
}

/// Matches `OP_m <pubkey>... OP_n OP_CHECKMULTISIG` with compressed or
/// uncompressed keys.
fn classify_multisig(script: &[u8]) -> ScriptClass {
    let (&first, mut rest) = match script.split_first() {
        Some(split) => split,
        None => return ScriptClass::NonStandard,
    };
    if !(OP_1..=OP_16).contains(&first) {
        return ScriptClass::NonStandard;
    }
    let required = (first - OP_1 + 1) as usize;

    let mut pubkeys = Vec::new();
    while let Some((&len, tail)) = rest.split_first() {
        if (len == 33 || len == 65) && tail.len() >= len as usize {
            pubkeys.push(tail[..len as usize].to_vec());
            rest = &tail[len as usize..];
        } else {
            break;
        }
    }

    match rest {
        [n, OP_CHECKMULTISIG]
            if (OP_1..=OP_16).contains(n)
                && (*n - OP_1 + 1) as usize == pubkeys.len()
                && required <= pubkeys.len()
                && !pubkeys.is_empty() =>
        {
            ScriptClass::Multisig(pubkeys)
        }
        _ => ScriptClass::NonStandard,
    }
}

/// Returns the set of addresses a locking script pays to under `network`.
///
/// Bare multisig yields one address per pushed pubkey; unrecognized
/// scripts yield an empty set.
pub fn extract_addresses(script: &[u8], network: Network) -> Vec<String> {
    match classify(script) {
        ScriptClass::P2Pkh(hash) => vec![base58check(network.p2pkh_version(), &hash)],
        ScriptClass::P2Sh(hash) => vec![base58check(network.p2sh_version(), &hash)],
        ScriptClass::P2Pk(pubkey) => {
            vec![base58check(network.p2pkh_version(), &hash160(&pubkey))]
        }
        ScriptClass::Multisig(pubkeys) => pubkeys
            .iter()
            .map(|pubkey| base58check(network.p2pkh_version(), &hash160(pubkey)))
            .collect(),
        ScriptClass::P2Wpkh(program) => {
            vec![bech32::encode_segwit(network.bech32_hrp(), 0, &program)]
        }
        ScriptClass::P2Wsh(program) => {
            vec![bech32::encode_segwit(network.bech32_hrp(), 0, &program)]
        }
        ScriptClass::NonStandard => Vec::new(),
    }
}

/// RIPEMD160(SHA256(data)), the hash behind legacy addresses.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripemd);
    out
}

/// Base58check encoding: version byte, payload, 4-byte SHA256d checksum.
fn base58check(version: u8, payload: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(1 + payload.len() + 4);
    bytes.push(version);
    bytes.extend_from_slice(payload);

    let checksum = {
        let first = Sha256::digest(&bytes);
        Sha256::digest(first)
    };
    bytes.extend_from_slice(&checksum[..4]);

    bs58::encode(bytes).into_string()
}

/// Bech32 encoding of segwit programs ([BIP-173]).
///
/// [BIP-173]: https://github.com/bitcoin/bips/blob/master/bip-0173.mediawiki
mod bech32 {
    /// Bech32 character set for encoding 5-bit values.
    const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

    /// Checksum constant for witness version 0 (BIP-173). Witness versions
    /// 1+ use the Bech32m constant 0x2bc830a3 (BIP-350).
    const BECH32_CONST: u32 = 1;
    const BECH32M_CONST: u32 = 0x2bc830a3;

    fn polymod(values: &[u8]) -> u32 {
        const GENERATOR: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];
        let mut chk: u32 = 1;
        for value in values {
            let top = chk >> 25;
            chk = (chk & 0x1ff_ffff) << 5 ^ (*value as u32);
            for (i, generator) in GENERATOR.iter().enumerate() {
                if (top >> i) & 1 == 1 {
                    chk ^= generator;
                }
            }
        }
        chk
    }

    fn hrp_expand(hrp: &str) -> Vec<u8> {
        let mut expanded: Vec<u8> = hrp.bytes().map(|b| b >> 5).collect();
        expanded.push(0);
        expanded.extend(hrp.bytes().map(|b| b & 0x1f));
        expanded
    }

    /// Regroups 8-bit bytes into 5-bit groups, padding the final group.
    fn to_five_bit_groups(data: &[u8]) -> Vec<u8> {
        let mut groups = Vec::with_capacity(data.len() * 8 / 5 + 1);
        let mut acc: u32 = 0;
        let mut bits: u32 = 0;
        for byte in data {
            acc = (acc << 8) | (*byte as u32);
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                groups.push(((acc >> bits) & 0x1f) as u8);
            }
        }
        if bits > 0 {
            groups.push(((acc << (5 - bits)) & 0x1f) as u8);
        }
        groups
    }

    /// Encodes a segwit address: witness version plus program bytes.
    pub(super) fn encode_segwit(hrp: &str, witness_version: u8, program: &[u8]) -> String {
        let checksum_const = if witness_version == 0 {
            BECH32_CONST
        } else {
            BECH32M_CONST
        };

        let mut data = vec![witness_version];
        data.extend(to_five_bit_groups(program));

        let mut checksum_input = hrp_expand(hrp);
        checksum_input.extend_from_slice(&data);
        checksum_input.extend_from_slice(&[0u8; 6]);
        let polymod = polymod(&checksum_input) ^ checksum_const;

        let mut encoded = String::with_capacity(hrp.len() + 1 + data.len() + 6);
        encoded.push_str(hrp);
        encoded.push('1');
        for value in &data {
            encoded.push(CHARSET[*value as usize] as char);
        }
        for i in 0..6 {
            let value = (polymod >> (5 * (5 - i))) & 0x1f;
            encoded.push(CHARSET[value as usize] as char);
        }
        encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// hash160 of the compressed generator-point pubkey (the BIP-173 test
    /// key).
    const TEST_KEY_HASH: &str = "751e76e8199196d454941c45d1b3a323f1433bd6";

    fn p2pkh_script(hash: &[u8; 20]) -> Vec<u8> {
        let mut script = vec![OP_DUP, OP_HASH160, 20];
        script.extend_from_slice(hash);
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        script
    }

    #[test]
    fn p2pkh_address() {
        let hash: [u8; 20] = hex::decode(TEST_KEY_HASH).unwrap().try_into().unwrap();
        let script = p2pkh_script(&hash);
        assert_eq!(classify(&script), ScriptClass::P2Pkh(hash));
        assert_eq!(
            extract_addresses(&script, Network::Mainnet),
            vec!["1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH".to_string()]
        );
    }

    #[test]
    fn p2sh_address() {
        let hash: [u8; 20] = hex::decode("8f55563b9a19f321c211e9b9f38cdf686ea07845")
            .unwrap()
            .try_into()
            .unwrap();
        let mut script = vec![OP_HASH160, 20];
        script.extend_from_slice(&hash);
        script.push(OP_EQUAL);
        assert_eq!(
            extract_addresses(&script, Network::Mainnet),
            vec!["3P14159f73E4gFr7JterCCQh9QjiTjiZrG".to_string()]
        );
    }

    #[test]
    fn p2pk_pays_to_pubkey_hash_address() {
        // The genesis coinbase output script.
        let pubkey = hex::decode("04678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5f").unwrap();
        let mut script = vec![65];
        script.extend_from_slice(&pubkey);
        script.push(OP_CHECKSIG);
        assert_eq!(classify(&script), ScriptClass::P2Pk(pubkey));
        assert_eq!(
            extract_addresses(&script, Network::Mainnet),
            vec!["1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".to_string()]
        );
    }

    #[test]
    fn p2wpkh_address() {
        let program: [u8; 20] = hex::decode(TEST_KEY_HASH).unwrap().try_into().unwrap();
        let mut script = vec![OP_0, 20];
        script.extend_from_slice(&program);
        assert_eq!(
            extract_addresses(&script, Network::Mainnet),
            vec!["bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".to_string()]
        );
        assert_eq!(
            extract_addresses(&script, Network::Testnet),
            vec!["tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx".to_string()]
        );
    }

    #[test]
    fn p2wsh_address() {
        let program: [u8; 32] =
            hex::decode("1863143c14c5166804bd19203356da136c985678cd4d27a1b8c6329604903262")
                .unwrap()
                .try_into()
                .unwrap();
        let mut script = vec![OP_0, 32];
        script.extend_from_slice(&program);
        assert_eq!(
            extract_addresses(&script, Network::Mainnet),
            vec!["bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3".to_string()]
        );
    }

    #[test]
    fn bare_multisig_yields_one_address_per_key() {
        let key_a = [0x02u8; 33];
        let key_b = [0x03u8; 33];
        let mut script = vec![OP_1];
        script.push(33);
        script.extend_from_slice(&key_a);
        script.push(33);
        script.extend_from_slice(&key_b);
        script.extend_from_slice(&[OP_1 + 1, OP_CHECKMULTISIG]);

        let addresses = extract_addresses(&script, Network::Mainnet);
        assert_eq!(addresses.len(), 2);
        assert_eq!(
            addresses[0],
            base58check(Network::Mainnet.p2pkh_version(), &hash160(&key_a))
        );
    }

    #[test]
    fn non_standard_scripts_yield_nothing() {
        // OP_RETURN data carrier.
        assert!(extract_addresses(&[0x6a, 0x04, 0xde, 0xad, 0xbe, 0xef], Network::Mainnet)
            .is_empty());
        // Empty script.
        assert!(extract_addresses(&[], Network::Mainnet).is_empty());
        // Multisig with a key-count mismatch.
        let mut script = vec![OP_1 + 2, 33];
        script.extend_from_slice(&[0x02; 33]);
        script.extend_from_slice(&[OP_1, OP_CHECKMULTISIG]);
        assert!(extract_addresses(&script, Network::Mainnet).is_empty());
    }
}
