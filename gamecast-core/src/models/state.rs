use bytes::Bytes;

/// Opaque game state as supplied by the host.
///
/// The relay stores and forwards it without looking inside. Cloning is a
/// reference-count bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateBlob(Bytes);

impl StateBlob {
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&'static str> for StateBlob {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for StateBlob {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Vec<u8>> for StateBlob {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}
