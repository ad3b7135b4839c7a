use alloy::primitives::{b256, Address, Bytes, B256, U256};

/// EIP-1967 implementation slot: `keccak256("eip1967.proxy.implementation") - 1`.
pub const EIP1967_IMPLEMENTATION_SLOT: B256 =
    b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// EIP-1967 admin slot: `keccak256("eip1967.proxy.admin") - 1`.
pub const EIP1967_ADMIN_SLOT: B256 =
    b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

pub const DEFAULT_ADMIN_ROLE_SELECTOR: [u8; 4] = [0xa2, 0x17, 0xfd, 0xdf];
pub const PAUSER_ROLE_SELECTOR: [u8; 4] = [0xe6, 0x3a, 0xb1, 0xe9];
pub const GET_ROLE_MEMBER_COUNT_SELECTOR: [u8; 4] = [0xca, 0x15, 0xc8, 0x73];
pub const GET_ROLE_MEMBER_SELECTOR: [u8; 4] = [0x90, 0x10, 0xd0, 0x7c];
pub const OWNER_SELECTOR: [u8; 4] = [0x8d, 0xa5, 0xcb, 0x5b];
pub const PAUSED_SELECTOR: [u8; 4] = [0x5c, 0x97, 0x5a, 0xbb];
pub const GET_MIN_DELAY_SELECTOR: [u8; 4] = [0xf2, 0x7a, 0x0c, 0x92];

pub const NAME_SELECTOR: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
pub const SYMBOL_SELECTOR: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
pub const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
pub const TOTAL_SUPPLY_SELECTOR: [u8; 4] = [0x18, 0x16, 0x0d, 0xdd];

/// ABI helpers for hand-built calldata. No ABI JSON is ever fetched.
pub struct AbiUtils;

impl AbiUtils {
    /// `selector` with no arguments.
    pub fn encode_call(selector: [u8; 4]) -> Bytes {
        Bytes::copy_from_slice(&selector)
    }

    /// `selector ‖ role` for `getRoleMemberCount(bytes32)`.
    pub fn encode_with_word(selector: [u8; 4], word: B256) -> Bytes {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(&selector);
        data.extend_from_slice(word.as_slice());
        data.into()
    }

    /// `selector ‖ role (32 bytes) ‖ index (32 bytes)` for `getRoleMember(bytes32,uint256)`.
    pub fn encode_role_member(role: B256, index: U256) -> Bytes {
        let mut data = Vec::with_capacity(68);
        data.extend_from_slice(&GET_ROLE_MEMBER_SELECTOR);
        data.extend_from_slice(role.as_slice());
        data.extend_from_slice(&index.to_be_bytes::<32>());
        data.into()
    }

    /// First 32-byte word of a return value; `None` for empty or short data.
    pub fn first_word(data: &[u8]) -> Option<B256> {
        if data.len() < 32 {
            return None;
        }
        Some(B256::from_slice(&data[..32]))
    }

    /// Low-order 20 bytes of a word as an address; the zero address means absent.
    pub fn word_to_address(word: B256) -> Option<Address> {
        let address = Address::from_slice(&word[12..]);
        if address == Address::ZERO {
            None
        } else {
            Some(address)
        }
    }

    pub fn decode_address(data: &[u8]) -> Option<Address> {
        Self::first_word(data).and_then(Self::word_to_address)
    }

    pub fn decode_u256(data: &[u8]) -> Option<U256> {
        Self::first_word(data).map(|w| U256::from_be_bytes(w.0))
    }

    pub fn decode_u64(data: &[u8]) -> Option<u64> {
        Self::decode_u256(data).and_then(|v| u64::try_from(v).ok())
    }

    /// Dynamic `string` return value, with a fallback for legacy `bytes32` tokens (MKR-style).
    pub fn decode_string(data: &[u8]) -> Option<String> {
        if data.len() >= 64 {
            let offset = usize::try_from(Self::decode_u256(&data[..32])?).ok()?;
            if offset + 32 <= data.len() {
                let len = usize::try_from(Self::decode_u256(&data[offset..offset + 32])?).ok()?;
                let start = offset + 32;
                if start + len <= data.len() {
                    let s = String::from_utf8_lossy(&data[start..start + len]).to_string();
                    return Some(s.trim_end_matches('\0').to_string());
                }
            }
        }
        if data.len() == 32 {
            let s = String::from_utf8_lossy(data).trim_end_matches('\0').to_string();
            if !s.is_empty() {
                return Some(s);
            }
        }
        None
    }
}
