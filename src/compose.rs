//! Assembly and hashing of the signed plaintext for a ucode image
//!
//! The plaintext covered by an image's signature is
//! `image_bytes || falcon_id || ucode_version || ucode_id || dep_map_ctx`
//! (u32 fields in little-endian storage order). The image lives in the
//! external region, the metadata does not, and the accelerator can only
//! stream intermediate chunks out of the region in block-size units, so an
//! arbitrary-length image is split: the block-aligned prefix is hashed in
//! place, while the unaligned tail is copied into a local staging buffer and
//! hashed together with the metadata as the final task.

use log::debug;

use crate::engine::SharedEngine;
use crate::hash::{Digest, HashAlgorithm, HashOp, HashTask, ImageStore, ShaAccelerator};
use crate::Error;

/// Size of the dependency-map context folded into the hash
pub const DEP_MAP_CTX_SIZE: usize = 16;

/// Serialized footprint of the metadata fields, including the falcon id
pub const METADATA_SIZE: usize = 4 + 4 + 4 + DEP_MAP_CTX_SIZE;

/// Fixed staging capacity for the unaligned tail plus the metadata
///
/// A hard ceiling, not a retry condition: an image whose tail does not fit
/// is rejected.
const STAGING_CAPACITY: usize = 256;

/// The firmware image being authenticated, as a byte range in the external
/// region
///
/// The region is untrusted until verification succeeds; it is only ever read.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ImageReference {
    /// Target falcon the image is destined for
    pub falcon_id: u32,
    /// Byte offset of the image in the external region
    pub offset: u64,
    /// Image length in bytes
    pub len: u32,
    /// Whether the range holds code (as opposed to data)
    pub is_code: bool,
    /// DMA port the accelerator should stream the region through
    pub dma_port: u8,
}

/// Non-binary fields folded into the signed plaintext
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ImageMetadata {
    pub ucode_version: u32,
    pub ucode_id: u32,
    pub dep_map_ctx: [u8; DEP_MAP_CTX_SIZE],
}

/// Digest the signed plaintext of `image` and `metadata`
///
/// Emits the block-aligned prefix of the image as a region task and the
/// staged remainder as the final task. The total length declared to the hash
/// engine is checked against the sum actually submitted before anything is
/// submitted.
pub fn compose<A>(
    engine: &SharedEngine<A>,
    store: &dyn ImageStore,
    image: &ImageReference,
    metadata: &ImageMetadata,
    algo: HashAlgorithm,
) -> Result<Digest, Error>
where
    A: ShaAccelerator,
{
    let image_len = image.len as u64;

    let end = image.offset.checked_add(image_len).ok_or(Error::Config)?;
    if end > store.size() {
        return Err(Error::Config);
    }

    let block = algo.block_size() as u64;
    let prefix = image_len - image_len % block;
    let tail = (image_len - prefix) as usize;

    if tail + METADATA_SIZE > STAGING_CAPACITY {
        return Err(Error::BufferTooSmall);
    }

    // Tail bytes cannot be hashed in place (not block-aligned), so they are
    // staged locally together with the metadata
    let mut staging = [0u8; STAGING_CAPACITY];

    if tail != 0 {
        store.read(image.offset + prefix, &mut staging[..tail])?;
    }

    let meta = &mut staging[tail..tail + METADATA_SIZE];
    meta[0..4].copy_from_slice(&image.falcon_id.to_le_bytes());
    meta[4..8].copy_from_slice(&metadata.ucode_version.to_le_bytes());
    meta[8..12].copy_from_slice(&metadata.ucode_id.to_le_bytes());
    meta[12..].copy_from_slice(&metadata.dep_map_ctx);

    let staged = tail + METADATA_SIZE;
    let total = image_len + METADATA_SIZE as u64;

    if total != prefix + staged as u64 {
        return Err(Error::Config);
    }

    debug!(
        "composing digest: falcon {} {} image, {}B in place + {}B staged",
        image.falcon_id,
        if image.is_code { "code" } else { "data" },
        prefix,
        staged
    );

    let mut op = HashOp::begin(engine, algo, total)?;

    if prefix != 0 {
        op.insert(&HashTask::Region {
            store,
            offset: image.offset,
            len: prefix as u32,
            port: image.dma_port,
        })?;
    }

    op.insert(&HashTask::Buffer(&staging[..staged]))?;

    op.finish()
}

#[cfg(test)]
mod test {
    use super::*;

    use alloc::vec::Vec;

    use sha2::{Digest as _, Sha256, Sha384};

    use crate::hash::{MemStore, SoftSha};

    fn metadata() -> ImageMetadata {
        ImageMetadata {
            ucode_version: 3,
            ucode_id: 9,
            dep_map_ctx: *b"dependency-ctx!!",
        }
    }

    fn reference_plaintext(image: &[u8], falcon_id: u32, meta: &ImageMetadata) -> Vec<u8> {
        let mut plain = Vec::new();
        plain.extend_from_slice(image);
        plain.extend_from_slice(&falcon_id.to_le_bytes());
        plain.extend_from_slice(&meta.ucode_version.to_le_bytes());
        plain.extend_from_slice(&meta.ucode_id.to_le_bytes());
        plain.extend_from_slice(&meta.dep_map_ctx);
        plain
    }

    fn image_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 13 + 1) as u8).collect()
    }

    #[test]
    fn digest_matches_one_shot_hash() {
        // Block-aligned, unaligned and empty image lengths, with the image
        // placed mid-region
        for len in [0usize, 64, 128, 1, 63, 65, 300, 512] {
            let image = image_bytes(len);
            let meta = metadata();

            let mut region = Vec::new();
            region.extend_from_slice(&[0xffu8; 32]);
            region.extend_from_slice(&image);
            region.extend_from_slice(&[0xeeu8; 16]);

            let store = MemStore(&region);
            let engine = SharedEngine::new(SoftSha::new());

            let reference = ImageReference {
                falcon_id: 7,
                offset: 32,
                len: len as u32,
                is_code: true,
                dma_port: 1,
            };

            let digest =
                compose(&engine, &store, &reference, &meta, HashAlgorithm::Sha256).unwrap();

            let expected = Sha256::digest(reference_plaintext(&image, 7, &meta));
            assert_eq!(digest.as_bytes(), &expected[..], "image length {}", len);
        }
    }

    #[test]
    fn digest_matches_for_sha384() {
        let image = image_bytes(200);
        let meta = metadata();
        let store = MemStore(&image);
        let engine = SharedEngine::new(SoftSha::new());

        let reference = ImageReference {
            falcon_id: 2,
            offset: 0,
            len: 200,
            is_code: false,
            dma_port: 0,
        };

        let digest = compose(&engine, &store, &reference, &meta, HashAlgorithm::Sha384).unwrap();

        let expected = Sha384::digest(reference_plaintext(&image, 2, &meta));
        assert_eq!(digest.as_bytes(), &expected[..]);
    }

    #[test]
    fn rejects_image_outside_region() {
        let region = image_bytes(100);
        let store = MemStore(&region);
        let engine = SharedEngine::new(SoftSha::new());

        let reference = ImageReference {
            falcon_id: 0,
            offset: 64,
            len: 64,
            is_code: true,
            dma_port: 0,
        };

        assert_eq!(
            compose(&engine, &store, &reference, &metadata(), HashAlgorithm::Sha256),
            Err(Error::Config)
        );
    }

    #[test]
    fn releases_engine_after_compose() {
        let image = image_bytes(100);
        let store = MemStore(&image);
        let engine = SharedEngine::new(SoftSha::new());

        let reference = ImageReference {
            falcon_id: 1,
            offset: 0,
            len: 100,
            is_code: true,
            dma_port: 0,
        };

        compose(&engine, &store, &reference, &metadata(), HashAlgorithm::Sha256).unwrap();

        assert!(engine.lease().is_ok());
    }
}
