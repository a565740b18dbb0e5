use super::prefetch::Fetched;
use super::{Digest, PipelineError};
use crate::counter;
use crate::metrics_defs::SOURCE_OBJECTS_FETCHED;
use bytes::Bytes;
use futures::TryStreamExt;
use futures::stream::BoxStream;

/// Decodes and concatenates fetched bodies in the order they arrive. Each
/// object's budget is released as soon as it has been decoded. Nothing is
/// returned unless every object was fetched and decoded.
pub async fn assemble(
    mut fetched: BoxStream<'_, Result<Fetched, PipelineError>>,
) -> Result<Digest, PipelineError> {
    let mut body = Vec::new();
    let mut objects = 0;

    while let Some(object) = fetched.try_next().await? {
        object.decode_into(&mut body)?;
        objects += 1;
        counter!(SOURCE_OBJECTS_FETCHED).increment(1);
        tracing::trace!(key = %object.key, bytes = object.body.len(), "Assembled source object");
    }

    Ok(Digest::new(Bytes::from(body), objects))
}
