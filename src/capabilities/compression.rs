//! The payload compression codec (spec §1 Deliberately OUT OF SCOPE "the
//! compression codec"; spec §4.1 "a single codec is chosen at construction
//! ... supplied by the embedder").
//!
//! [`PubSubClient`](crate::pubsub::PubSubClient) never picks an encoding
//! itself; it only calls through this trait, so swapping in a real
//! dictionary coder (`zstd` with a shared dictionary, `brotli`, ...) never
//! touches the engine.

/// A pure `encode`/`decode` function pair, injected by the embedder.
pub trait Codec {
    /// Compresses `data`. Must be the exact inverse of [`decode`](Self::decode).
    fn encode(&self, data: &[u8]) -> Vec<u8>;

    /// Decompresses `data` produced by [`encode`](Self::encode).
    ///
    /// Returns `None` on malformed input so
    /// [`PubSubClient::on_message`](crate::pubsub::PubSubClient::on_message)
    /// can fall back to treating the payload as plain, uncompressed JSON
    /// (spec §4.1 `on_message`).
    fn decode(&self, data: &[u8]) -> Option<Vec<u8>>;
}

/// No-op codec: `encode`/`decode` are both the identity function.
///
/// The default when an embedder doesn't supply a dictionary coder (spec
/// §4.1: "a single codec is chosen at construction (identity, or a named
/// dictionary coder)").
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn encode(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn decode(&self, data: &[u8]) -> Option<Vec<u8>> {
        Some(data.to_vec())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! A trivial reversible "dictionary" coder standing in for a real one
    //! (`zstd`, `brotli`, ...) in tests: prefixes the payload with a magic
    //! tag so `decode` can tell compressed frames from plain JSON apart.

    use super::Codec;

    const MAGIC: &[u8] = b"\0MLC1";

    #[derive(Debug, Default, Clone, Copy)]
    pub struct TaggingCodec;

    impl Codec for TaggingCodec {
        fn encode(&self, data: &[u8]) -> Vec<u8> {
            let mut out = Vec::with_capacity(MAGIC.len() + data.len());
            out.extend_from_slice(MAGIC);
            out.extend_from_slice(data);
            out
        }

        fn decode(&self, data: &[u8]) -> Option<Vec<u8>> {
            data.strip_prefix(MAGIC).map(<[u8]>::to_vec)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::TaggingCodec;
    use super::{Codec, IdentityCodec};

    #[test]
    fn identity_codec_round_trips() {
        let codec = IdentityCodec;
        let data = b"hello world".to_vec();
        assert_eq!(codec.decode(&codec.encode(&data)).unwrap(), data);
    }

    #[test]
    fn tagging_codec_round_trips_and_rejects_untagged_input() {
        let codec = TaggingCodec;
        let data = b"{\"sender\":\"a\"}".to_vec();
        let encoded = codec.encode(&data);
        assert_eq!(codec.decode(&encoded).unwrap(), data);
        assert_eq!(codec.decode(&data), None);
    }
}
