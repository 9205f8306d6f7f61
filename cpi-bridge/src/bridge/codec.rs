//! JSON document codec for plugin streams.
//!
//! Plugins speak unframed JSON: one document per direction, optionally
//! followed by a newline. The decoder yields a document as soon as it is
//! complete and waits for more bytes while it is not.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec that writes newline-terminated JSON documents and reads
/// self-delimiting ones.
pub struct JsonDocumentCodec<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonDocumentCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonDocumentCodec<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonDocumentCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (item, consumed) = {
            let mut documents = serde_json::Deserializer::from_slice(&src[..]).into_iter::<T>();
            match documents.next() {
                Some(Ok(item)) => (item, documents.byte_offset()),
                // Document not complete yet
                Some(Err(e)) if e.is_eof() => return Ok(None),
                Some(Err(e)) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
                None => return Ok(None),
            }
        };
        src.advance(consumed);
        tracing::trace!(json_size_bytes = consumed, "Decoded document");
        Ok(Some(item))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("stream ended inside a JSON document ({} bytes)", src.len()),
        ))
    }
}

impl<T: Serialize> Encoder<T> for JsonDocumentCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(json_size_bytes = json.len(), "Encoding document");
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
