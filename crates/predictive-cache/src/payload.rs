use crate::error::Result;
use bytes::Bytes;
use serde::Serialize;

/// A value the predictive cache can hold and account for.
///
/// Sizes are estimates used for the byte budget: text counts two bytes per
/// UTF-16 unit, binary counts its length, anything else counts its JSON text.
pub trait Payload: Clone {
    fn estimated_size(&self) -> Result<usize>;
}

fn utf16_bytes(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

impl Payload for String {
    fn estimated_size(&self) -> Result<usize> {
        Ok(utf16_bytes(self))
    }
}

impl Payload for Bytes {
    fn estimated_size(&self) -> Result<usize> {
        Ok(self.len())
    }
}

impl Payload for Vec<u8> {
    fn estimated_size(&self) -> Result<usize> {
        Ok(self.len())
    }
}

impl Payload for serde_json::Value {
    fn estimated_size(&self) -> Result<usize> {
        Ok(utf16_bytes(&serde_json::to_string(self)?))
    }
}

/// Wraps any serializable value so it can be cached with a JSON size estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize + Clone> Payload for Json<T> {
    fn estimated_size(&self) -> Result<usize> {
        Ok(utf16_bytes(&serde_json::to_string(&self.0)?))
    }
}
