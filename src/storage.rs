//! Persistence of the voxel grid. Chunks are stored with Run Length Encoding, grouped into
//! regions of [`CHUNKS_PER_REGION`] chunks, and every region is compressed on its own.

use bevy::math::UVec3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{Lattice, Result, TerrainConfig, TerrainError, Voxel, VoxelField};

/// Number of chunks stored in one region
pub const CHUNKS_PER_REGION: usize = 16;

/// Version written into every region header
pub const REGION_VERSION: u32 = 1;

/// ChunkData stores the voxels of a chunk with Run Length Encoding compression. A run of
/// repeated voxels is stored as the voxel twice followed by the run length, any other voxel is
/// stored once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkData(SmallVec<[u32; 3]>);

impl From<&VoxelField> for ChunkData {
    fn from(value: &VoxelField) -> Self {
        let mut buf = SmallVec::new();
        let mut last = 0u32;
        let mut count = 0u32;
        for (k, v) in value.voxels().iter().map(Voxel::raw).enumerate() {
            if k != 0 && last == v {
                count += 1;
                continue;
            }
            if count > 1 {
                buf.push(last);
                buf.push(count);
            };
            buf.push(v);
            count = 1;
            last = v;
        }
        if count > 1 {
            buf.push(last);
            buf.push(count);
        };

        Self(buf)
    }
}

impl ChunkData {
    /// The number of bytes the encoded chunk takes up
    pub fn n_bytes(&self) -> usize {
        self.0.len() * std::mem::size_of::<u32>()
    }

    /// Chunk data where all `count` voxels are `voxel`
    pub fn uniform(voxel: Voxel, count: usize) -> Self {
        Self(SmallVec::from_slice(&[voxel.raw(), voxel.raw(), count as u32]))
    }

    /// Expand the data into a field of the given lattice. Returns `None` if the data does not
    /// hold exactly one voxel per lattice sample
    pub fn expand(&self, lattice: Lattice) -> Option<VoxelField> {
        let volume = lattice.volume();
        let mut buf = Vec::with_capacity(volume);

        let len = self.0.len();
        let mut k = 0;
        while k < len {
            let v = self.0[k];
            if k + 2 < len && self.0[k + 1] == v {
                let n = self.0[k + 2] as usize;
                if buf.len() + n > volume {
                    return None;
                }
                buf.resize(buf.len() + n, Voxel::from_raw(v));
                k += 3;
                continue;
            }

            buf.push(Voxel::from_raw(v));
            k += 1;
        }

        VoxelField::from_voxels(lattice, buf)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct RegionHeader {
    version: u32,
    grid_size: [u32; 3],
    chunk_size: u32,
    first_chunk: u32,
    chunk_count: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Region {
    header: RegionHeader,
    chunks: Vec<ChunkData>,
}

/// A whole persisted grid
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedMap {
    /// Chunks per axis of the grid that was saved
    pub grid_size: [u32; 3],
    /// Lattice size of the chunks that were saved
    pub chunk_size: u32,
    /// Compressed region streams, in grid order
    pub regions: Vec<Vec<u8>>,
}

impl SavedMap {
    /// Encode the fields of every chunk, given in grid order
    pub fn encode<'a, I>(config: &TerrainConfig, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a VoxelField>,
    {
        let chunks: Vec<ChunkData> = fields.into_iter().map(ChunkData::from).collect();
        if chunks.len() != config.chunk_count() {
            return Err(TerrainError::MalformedRegion {
                region: 0,
                reason: format!(
                    "expected {} chunks, got {}",
                    config.chunk_count(),
                    chunks.len()
                ),
            });
        }

        let regions = chunks
            .chunks(CHUNKS_PER_REGION)
            .enumerate()
            .map(|(index, chunks)| encode_region(config, index, chunks))
            .collect::<Result<_>>()?;

        Ok(Self {
            grid_size: config.grid_size,
            chunk_size: config.chunk_size,
            regions,
        })
    }

    /// Decode every chunk's field, in grid order. Nothing is returned unless every region is
    /// valid and matches `config`
    pub fn decode(&self, config: &TerrainConfig) -> Result<Vec<VoxelField>> {
        check_config(config, self.grid_size, self.chunk_size)?;

        let lattice = Lattice::new(config.chunk_size);
        let mut fields = Vec::with_capacity(config.chunk_count());
        for (index, bytes) in self.regions.iter().enumerate() {
            let region = decode_region(index, bytes)?;
            check_config(config, region.header.grid_size, region.header.chunk_size)?;

            let malformed = |reason: String| TerrainError::MalformedRegion {
                region: index,
                reason,
            };
            if region.header.version != REGION_VERSION {
                return Err(malformed(format!(
                    "unsupported version {}",
                    region.header.version
                )));
            }
            if region.header.first_chunk as usize != fields.len() {
                return Err(malformed(format!(
                    "starts at chunk {}, expected {}",
                    region.header.first_chunk,
                    fields.len()
                )));
            }
            if region.header.chunk_count as usize != region.chunks.len() {
                return Err(malformed(format!(
                    "header lists {} chunks, found {}",
                    region.header.chunk_count,
                    region.chunks.len()
                )));
            }

            for (k, chunk) in region.chunks.iter().enumerate() {
                let field = chunk.expand(lattice).ok_or_else(|| {
                    malformed(format!(
                        "chunk {k} does not hold {} voxels",
                        lattice.volume()
                    ))
                })?;
                fields.push(field);
            }
        }

        if fields.len() != config.chunk_count() {
            return Err(TerrainError::MalformedRegion {
                region: self.regions.len(),
                reason: format!(
                    "found {} chunks, expected {}",
                    fields.len(),
                    config.chunk_count()
                ),
            });
        }
        Ok(fields)
    }

    /// Serialize the whole map into one byte buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TerrainError::MalformedRegion {
            region: 0,
            reason: e.to_string(),
        })
    }

    /// Read a map written by [`SavedMap::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| TerrainError::MalformedRegion {
            region: 0,
            reason: e.to_string(),
        })
    }
}

fn check_config(config: &TerrainConfig, grid_size: [u32; 3], chunk_size: u32) -> Result<()> {
    if grid_size != config.grid_size || chunk_size != config.chunk_size {
        return Err(TerrainError::ConfigMismatch {
            saved_grid: UVec3::from_array(grid_size),
            runtime_grid: config.grid(),
            saved_chunk_size: chunk_size,
            runtime_chunk_size: config.chunk_size,
        });
    }
    Ok(())
}

fn encode_region(config: &TerrainConfig, index: usize, chunks: &[ChunkData]) -> Result<Vec<u8>> {
    let region = Region {
        header: RegionHeader {
            version: REGION_VERSION,
            grid_size: config.grid_size,
            chunk_size: config.chunk_size,
            first_chunk: (index * CHUNKS_PER_REGION) as u32,
            chunk_count: chunks.len() as u32,
        },
        chunks: chunks.to_vec(),
    };
    let bytes = bincode::serialize(&region).map_err(|e| TerrainError::MalformedRegion {
        region: index,
        reason: e.to_string(),
    })?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

fn decode_region(index: usize, bytes: &[u8]) -> Result<Region> {
    let bytes =
        lz4_flex::decompress_size_prepended(bytes).map_err(|e| TerrainError::MalformedRegion {
            region: index,
            reason: e.to_string(),
        })?;
    bincode::deserialize(&bytes).map_err(|e| TerrainError::MalformedRegion {
        region: index,
        reason: e.to_string(),
    })
}

#[cfg(test)]
fn test_config() -> TerrainConfig {
    TerrainConfig {
        chunk_size: 6,
        grid_size: [3, 2, 3],
        ..Default::default()
    }
}

#[cfg(test)]
fn test_fields(config: &TerrainConfig) -> Vec<VoxelField> {
    let lattice = Lattice::new(config.chunk_size);
    (0..config.chunk_count())
        .map(|chunk| {
            let mut field = VoxelField::empty(lattice);
            for (i, voxel) in field.voxels_mut().iter_mut().enumerate() {
                let density = ((i * 7 + chunk * 13) % 23) as f32 / 4. - 2.9;
                *voxel = Voxel::new(density, (i % 5) as u8 + chunk as u8);
            }
            // Leave long runs in part of every chunk
            field.voxels_mut()[..100].fill(Voxel::new(-1., 3));
            field
        })
        .collect()
}

#[test]
fn test_rle() {
    let v = |m: u8| Voxel::new(0., m);
    let mut input = Vec::with_capacity(64);
    input.extend_from_slice(&[v(12); 10]);
    input.push(v(0));
    input.extend_from_slice(&[v(29); 52]);
    input.push(v(1));

    let field = VoxelField::from_voxels(Lattice::new(4), input).unwrap();
    let output = ChunkData::from(&field);
    assert_eq!(
        output.0.as_slice(),
        &[v(12).raw(), v(12).raw(), 10, v(0).raw(), v(29).raw(), v(29).raw(), 52, v(1).raw()]
    );
    assert_eq!(Some(field), output.expand(Lattice::new(4)));
}

#[test]
fn test_rle_uniform_fits_in_smallvec() {
    let field = VoxelField::empty(Lattice::new(16));
    let output = ChunkData::from(&field);
    assert!(!output.0.spilled());
    assert_eq!(ChunkData::uniform(Voxel::EMPTY, 4096), output);
    assert_eq!(12, output.n_bytes());
}

#[test]
fn test_rle_expand_rejects_wrong_length() {
    let lattice = Lattice::new(4);
    assert!(ChunkData::uniform(Voxel::EMPTY, 63).expand(lattice).is_none());
    assert!(ChunkData::uniform(Voxel::EMPTY, 65).expand(lattice).is_none());
    assert!(ChunkData::uniform(Voxel::EMPTY, 64).expand(lattice).is_some());
}

#[test]
fn test_map_roundtrip() {
    let config = test_config();
    let fields = test_fields(&config);
    let map = SavedMap::encode(&config, &fields).unwrap();
    // 18 chunks need two regions
    assert_eq!(2, map.regions.len());

    let bytes = map.to_bytes().unwrap();
    let decoded = SavedMap::from_bytes(&bytes).unwrap().decode(&config).unwrap();
    assert_eq!(fields, decoded);
}

#[test]
fn test_grid_mismatch_is_reported() {
    let config = test_config();
    let map = SavedMap::encode(&config, &test_fields(&config)).unwrap();

    let other = TerrainConfig {
        grid_size: [3, 3, 2],
        ..config.clone()
    };
    assert_eq!(
        Err(TerrainError::ConfigMismatch {
            saved_grid: UVec3::new(3, 2, 3),
            runtime_grid: UVec3::new(3, 3, 2),
            saved_chunk_size: 6,
            runtime_chunk_size: 6,
        }),
        map.decode(&other)
    );
}

#[test]
fn test_malformed_regions_are_reported() {
    let config = test_config();
    let map = SavedMap::encode(&config, &test_fields(&config)).unwrap();

    let mut truncated = map.clone();
    truncated.regions.pop();
    assert!(matches!(
        truncated.decode(&config),
        Err(TerrainError::MalformedRegion { region: 1, .. })
    ));

    let mut corrupted = map.clone();
    corrupted.regions[1].truncate(10);
    assert!(matches!(
        corrupted.decode(&config),
        Err(TerrainError::MalformedRegion { region: 1, .. })
    ));

    let mut swapped = map;
    swapped.regions.swap(0, 1);
    assert!(matches!(
        swapped.decode(&config),
        Err(TerrainError::MalformedRegion { region: 0, .. })
    ));
}
