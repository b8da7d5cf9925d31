//! Bincode Codec using `bincode`

use crate::traits::CacheCodec;
use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Bincode Codec using `bincode` 1.x
///
/// Fastest option, but not self-describing: changing a cached type's layout
/// makes old entries undecodable (they are then treated as misses).
#[cfg_attr(docsrs, doc(cfg(feature = "bincode")))]
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl CacheCodec for BincodeCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn name(&self) -> &'static str {
        "bincode"
    }
}
