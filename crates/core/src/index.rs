//! Flat (brute force) vector index persisted as a single binary file.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic "PSFX" | version u32 | metric u32 | dimensions u32 | rows u64 | rows * dimensions f32
//! ```

use crate::traits::VectorIndex;
use crate::SearchError;
use rayon::prelude::*;
use std::fs;
use std::path::Path;

const MAGIC: &[u8; 4] = b"PSFX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    InnerProduct,
    L2,
}

impl Metric {
    fn tag(self) -> u32 {
        match self {
            Metric::InnerProduct => 0,
            Metric::L2 => 1,
        }
    }

    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Metric::InnerProduct),
            1 => Some(Metric::L2),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Metric::InnerProduct => "flat inner-product",
            Metric::L2 => "flat L2",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    dimensions: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimensions: usize) -> Self {
        Self::with_metric(dimensions, Metric::InnerProduct)
    }

    pub fn with_metric(dimensions: usize, metric: Metric) -> Self {
        Self {
            metric,
            dimensions,
            data: Vec::new(),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn add(&mut self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<(), SearchError> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&self.metric.tag().to_le_bytes());
        bytes.extend_from_slice(&(self.dimensions as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Reads any flat index regardless of metric.
    pub fn read(path: &Path) -> Result<Self, SearchError> {
        let bytes = fs::read(path)?;
        let corrupt = |details: &str| {
            SearchError::CorruptArtifacts(format!("{}: {details}", path.display()))
        };

        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(corrupt("not a flat index file"));
        }
        let version = read_u32(&bytes, 4);
        if version != FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported format version {version}")));
        }
        let metric = Metric::from_tag(read_u32(&bytes, 8))
            .ok_or_else(|| corrupt("unknown metric tag"))?;
        let dimensions = read_u32(&bytes, 12) as usize;
        let rows = read_u64(&bytes, 16) as usize;

        let payload = &bytes[HEADER_LEN..];
        let expected = rows
            .checked_mul(dimensions)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| corrupt("row count overflows"))?;
        if payload.len() != expected {
            return Err(corrupt(&format!(
                "expected {expected} bytes of vectors, found {}",
                payload.len()
            )));
        }

        let mut data: Vec<f32> = bytemuck::pod_collect_to_vec(payload);
        if cfg!(target_endian = "big") {
            for value in &mut data {
                *value = f32::from_bits(value.to_bits().swap_bytes());
            }
        }

        Ok(Self {
            metric,
            dimensions,
            data,
        })
    }

    /// Reads an index and insists on the inner-product flavor.
    pub fn read_inner_product(path: &Path) -> Result<Self, SearchError> {
        let index = Self::read(path)?;
        if index.metric != Metric::InnerProduct {
            return Err(SearchError::IndexType {
                expected: Metric::InnerProduct.name().to_string(),
                found: index.metric.name().to_string(),
            });
        }
        Ok(index)
    }

    fn score(&self, query: &[f32], row: &[f32]) -> f32 {
        match self.metric {
            Metric::InnerProduct => query.iter().zip(row).map(|(a, b)| a * b).sum(),
            Metric::L2 => -query
                .iter()
                .zip(row)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>(),
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(word)
}

impl VectorIndex for FlatIndex {
    fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn search(&self, query: &[f32], k: usize) -> Result<(Vec<i64>, Vec<f32>), SearchError> {
        if query.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let scores: Vec<f32> = if self.dimensions == 0 {
            Vec::new()
        } else {
            self.data
                .par_chunks(self.dimensions)
                .map(|row| self.score(query, row))
                .collect()
        };

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&left, &right| {
            scores[right]
                .total_cmp(&scores[left])
                .then(left.cmp(&right))
        });
        order.truncate(k);

        let mut rows = Vec::with_capacity(k);
        let mut hits = Vec::with_capacity(k);
        for row in order {
            rows.push(row as i64);
            hits.push(scores[row]);
        }
        while rows.len() < k {
            rows.push(-1);
            hits.push(f32::NEG_INFINITY);
        }

        Ok((rows, hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> FlatIndex {
        let mut index = FlatIndex::new(3);
        index.add(&[1.0, 0.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0, 0.0]).unwrap();
        index.add(&[0.6, 0.8, 0.0]).unwrap();
        index.add(&[0.0, 1.0, 0.0]).unwrap();
        index
    }

    #[test]
    fn search_orders_by_inner_product_then_row() {
        let index = sample_index();
        let (rows, scores) = index.search(&[0.0, 1.0, 0.0], 3).unwrap();

        assert_eq!(rows, vec![1, 3, 2]);
        assert_eq!(scores[0], 1.0);
        assert!((scores[2] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn short_result_sets_are_padded() {
        let index = sample_index();
        let (rows, scores) = index.search(&[1.0, 0.0, 0.0], 6).unwrap();

        assert_eq!(rows.len(), 6);
        assert_eq!(&rows[4..], &[-1, -1]);
        assert!(scores[5].is_infinite());
    }

    #[test]
    fn wrong_query_dimension_is_rejected() {
        let index = sample_index();
        assert!(matches!(
            index.search(&[1.0, 0.0], 2),
            Err(SearchError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        let mut index = FlatIndex::new(2);
        assert!(index.add(&[1.0]).is_err());
    }

    #[test]
    fn persisted_index_answers_identically() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("flat_ip.index");
        let index = sample_index();
        index.write(&path)?;

        let reloaded = FlatIndex::read_inner_product(&path)?;
        assert_eq!(reloaded.len(), 4);
        assert_eq!(reloaded.dimensions(), 3);
        assert_eq!(reloaded.data, index.data);
        assert_eq!(
            reloaded.search(&[0.6, 0.8, 0.0], 4)?,
            index.search(&[0.6, 0.8, 0.0], 4)?
        );
        Ok(())
    }

    #[test]
    fn other_index_flavors_are_refused() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("l2.index");
        let mut index = FlatIndex::with_metric(2, Metric::L2);
        index.add(&[1.0, 2.0])?;
        index.write(&path)?;

        assert_eq!(FlatIndex::read(&path)?.metric(), Metric::L2);
        assert!(matches!(
            FlatIndex::read_inner_product(&path),
            Err(SearchError::IndexType { .. })
        ));
        Ok(())
    }

    #[test]
    fn truncated_files_are_corrupt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("flat_ip.index");
        sample_index().write(&path)?;
        let bytes = fs::read(&path)?;
        fs::write(&path, &bytes[..bytes.len() - 3])?;

        assert!(matches!(
            FlatIndex::read(&path),
            Err(SearchError::CorruptArtifacts(_))
        ));

        fs::write(&path, b"garbage")?;
        assert!(matches!(
            FlatIndex::read(&path),
            Err(SearchError::CorruptArtifacts(_))
        ));
        Ok(())
    }
}
