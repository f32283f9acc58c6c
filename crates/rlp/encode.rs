use bytes::BufMut;
use ethereum_types::{Address, Bloom, Signature, H128, H256, H264, H32, H512, H64, U256};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::constants::{RLP_EMPTY_LIST, RLP_NULL};

/// Trait for encoding values as RLP.
/// See <https://ethereum.org/en/developers/docs/data-structures-and-encoding/rlp/#rlp-encoding> for more information.
pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn length(&self) -> usize {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf.len()
    }
}

impl RLPEncode for bool {
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self {
            buf.put_u8(0x01);
        } else {
            buf.put_u8(RLP_NULL);
        }
    }
}

impl RLPEncode for u8 {
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self == 0 {
            buf.put_u8(RLP_NULL);
        } else if *self < RLP_NULL {
            buf.put_u8(*self);
        } else {
            buf.put_u8(RLP_NULL + 1);
            buf.put_u8(*self);
        }
    }
}

macro_rules! impl_uint_encode {
    ($t:ty) => {
        impl RLPEncode for $t {
            fn encode(&self, buf: &mut dyn BufMut) {
                let bytes = self.to_be_bytes();
                let first_nonzero = bytes.iter().position(|&b| b != 0);
                match first_nonzero {
                    Some(idx) => encode_bytes(&bytes[idx..], buf),
                    None => buf.put_u8(RLP_NULL),
                }
            }
        }
    };
}

impl_uint_encode!(u16);
impl_uint_encode!(u32);
impl_uint_encode!(u64);
impl_uint_encode!(u128);
impl_uint_encode!(usize);

impl RLPEncode for () {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(RLP_EMPTY_LIST);
    }
}

impl<const N: usize> RLPEncode for [u8; N] {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl RLPEncode for [u8] {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl RLPEncode for bytes::Bytes {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl RLPEncode for str {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for String {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        let first_nonzero = bytes.iter().position(|&b| b != 0);
        match first_nonzero {
            Some(idx) => encode_bytes(&bytes[idx..], buf),
            None => buf.put_u8(RLP_NULL),
        }
    }
}

macro_rules! impl_hash_encode {
    ($t:ty) => {
        impl RLPEncode for $t {
            fn encode(&self, buf: &mut dyn BufMut) {
                encode_bytes(self.as_bytes(), buf);
            }
        }
    };
}

impl_hash_encode!(H32);
impl_hash_encode!(H64);
impl_hash_encode!(H128);
impl_hash_encode!(H256);
impl_hash_encode!(H264);
impl_hash_encode!(Address);
impl_hash_encode!(H512);
impl_hash_encode!(Signature);
impl_hash_encode!(Bloom);

impl RLPEncode for Ipv4Addr {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(&self.octets(), buf);
    }
}

impl RLPEncode for Ipv6Addr {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(&self.octets(), buf);
    }
}

impl RLPEncode for IpAddr {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            IpAddr::V4(ip) => ip.encode(buf),
            IpAddr::V6(ip) => ip.encode(buf),
        }
    }
}

impl<T: RLPEncode> RLPEncode for Option<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            Some(value) => value.encode(buf),
            None => buf.put_u8(RLP_EMPTY_LIST),
        }
    }
}

impl<T: RLPEncode> RLPEncode for Vec<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut temp_buf = Vec::new();
        for item in self {
            item.encode(&mut temp_buf);
        }
        encode_list_length(temp_buf.len(), buf);
        buf.put_slice(&temp_buf);
    }
}

impl<T: RLPEncode> RLPEncode for &[T] {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut temp_buf = Vec::new();
        for item in self.iter() {
            item.encode(&mut temp_buf);
        }
        encode_list_length(temp_buf.len(), buf);
        buf.put_slice(&temp_buf);
    }
}

impl<T1: RLPEncode, T2: RLPEncode> RLPEncode for (T1, T2) {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut temp_buf = Vec::new();
        self.0.encode(&mut temp_buf);
        self.1.encode(&mut temp_buf);
        encode_list_length(temp_buf.len(), buf);
        buf.put_slice(&temp_buf);
    }
}

impl<T1: RLPEncode, T2: RLPEncode, T3: RLPEncode> RLPEncode for (T1, T2, T3) {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut temp_buf = Vec::new();
        self.0.encode(&mut temp_buf);
        self.1.encode(&mut temp_buf);
        self.2.encode(&mut temp_buf);
        encode_list_length(temp_buf.len(), buf);
        buf.put_slice(&temp_buf);
    }
}

fn encode_bytes(bytes: &[u8], buf: &mut dyn BufMut) {
    if bytes.len() == 1 && bytes[0] < RLP_NULL {
        buf.put_u8(bytes[0]);
    } else {
        encode_length(bytes.len(), buf);
        buf.put_slice(bytes);
    }
}

/// Writes the RLP prefix for a byte string of the given payload length, based
/// at `RLP_NULL` (0x80) / `0xB7` for the long form.
pub fn encode_length(len: usize, buf: &mut dyn BufMut) {
    if len < 56 {
        buf.put_u8(RLP_NULL + len as u8);
    } else {
        let len_bytes = len.to_be_bytes();
        let first_nonzero = len_bytes.iter().position(|&b| b != 0).unwrap_or(len_bytes.len() - 1);
        let len_bytes = &len_bytes[first_nonzero..];
        buf.put_u8(0xB7 + len_bytes.len() as u8);
        buf.put_slice(len_bytes);
    }
}

/// Writes the RLP prefix for a list of the given payload length, based at
/// `RLP_EMPTY_LIST` (0xC0) / `0xF7` for the long form.
pub fn encode_list_length(len: usize, buf: &mut dyn BufMut) {
    if len < 56 {
        buf.put_u8(RLP_EMPTY_LIST + len as u8);
    } else {
        let len_bytes = len.to_be_bytes();
        let first_nonzero = len_bytes.iter().position(|&b| b != 0).unwrap_or(len_bytes.len() - 1);
        let len_bytes = &len_bytes[first_nonzero..];
        buf.put_u8(0xF7 + len_bytes.len() as u8);
        buf.put_slice(len_bytes);
    }
}
