//! Data sources - pre-tokenized JSONL examples batched into fixed-shape tensors

use anyhow::{bail, ensure, Context, Result};
use bert_engine::HeadKind;
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::config::DataConfig;

/// One step's worth of inputs. Every field is a fixed-shape u32 tensor.
#[derive(Clone, Debug)]
pub struct Batch {
    /// [batch, seq]
    pub input_ids: Tensor,
    /// [batch, seq]
    pub token_type_ids: Tensor,
    /// [batch] for the sequence head, [batch, seq] for the token head
    pub labels: Tensor,
}

impl Batch {
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            input_ids: self.input_ids.to_device(device)?,
            token_type_ids: self.token_type_ids.to_device(device)?,
            labels: self.labels.to_device(device)?,
        })
    }

    pub fn size(&self) -> Result<usize> {
        Ok(self.input_ids.dim(0)?)
    }
}

/// Anything the trainer can iterate once per epoch, in its native order.
pub trait DataSource {
    /// Number of batches one pass yields
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

impl DataSource for Vec<Batch> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        Box::new(self.as_slice().iter().cloned().map(Ok))
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Labels {
    Single(u32),
    Sequence(Vec<u32>),
}

/// One pre-tokenized JSONL record
#[derive(Deserialize, Debug, Clone)]
pub struct Example {
    pub input_ids: Vec<u32>,
    #[serde(default)]
    pub token_type_ids: Vec<u32>,
    pub labels: Labels,
}

/// Reads one example per non-empty line.
pub fn load_examples<P: AsRef<Path>>(path: P) -> Result<Vec<Example>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Cannot open '{}'", path.display()))?;
    let mut examples = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let example: Example = serde_json::from_str(&line).with_context(|| {
            format!("Malformed example at {}:{}", path.display(), line_no + 1)
        })?;
        examples.push(example);
    }
    Ok(examples)
}

/// In-memory batches built from examples (CPU tensors, moved to the device per step)
pub struct BatchedDataset {
    batches: Vec<Batch>,
    pub num_examples: usize,
}

impl BatchedDataset {
    pub fn from_jsonl<P: AsRef<Path>>(
        path: P,
        cfg: &DataConfig,
        head: HeadKind,
        shuffle_seed: Option<u64>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let examples = load_examples(path)?;
        let dataset = Self::from_examples(examples, cfg, head, shuffle_seed)?;
        tracing::info!(
            "Loaded {:?}: {} examples in {} batches (batch_size={}, max_len={})",
            path,
            dataset.num_examples,
            dataset.batches.len(),
            cfg.batch_size,
            cfg.max_len
        );
        Ok(dataset)
    }

    pub fn from_examples(
        mut examples: Vec<Example>,
        cfg: &DataConfig,
        head: HeadKind,
        shuffle_seed: Option<u64>,
    ) -> Result<Self> {
        ensure!(cfg.batch_size >= 1, "batch_size must be at least 1");
        if let Some(seed) = shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed);
            examples.shuffle(&mut rng);
        }

        let num_examples = examples.len();
        let mut batches = Vec::with_capacity(num_examples.div_ceil(cfg.batch_size));
        for (chunk_idx, chunk) in examples.chunks(cfg.batch_size).enumerate() {
            let batch = collate(chunk, cfg, head)
                .with_context(|| format!("Failed to collate batch {}", chunk_idx))?;
            batches.push(batch);
        }

        Ok(Self {
            batches,
            num_examples,
        })
    }
}

impl DataSource for BatchedDataset {
    fn len(&self) -> usize {
        self.batches.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        Box::new(self.batches.as_slice().iter().cloned().map(Ok))
    }
}

/// Truncates / pads each example to `max_len` and stacks them.
fn collate(examples: &[Example], cfg: &DataConfig, head: HeadKind) -> Result<Batch> {
    let len = cfg.max_len;
    let b_sz = examples.len();
    let mut input_ids = Vec::with_capacity(b_sz * len);
    let mut token_type_ids = Vec::with_capacity(b_sz * len);
    let mut labels = Vec::with_capacity(match head {
        HeadKind::Sequence => b_sz,
        HeadKind::Token => b_sz * len,
    });

    for (i, ex) in examples.iter().enumerate() {
        ensure!(!ex.input_ids.is_empty(), "example {} has no input_ids", i);
        ensure!(
            ex.token_type_ids.is_empty() || ex.token_type_ids.len() == ex.input_ids.len(),
            "example {}: token_type_ids length {} != input_ids length {}",
            i,
            ex.token_type_ids.len(),
            ex.input_ids.len()
        );

        input_ids.extend(pad_to(&ex.input_ids, len, cfg.pad_id));
        token_type_ids.extend(pad_to(&ex.token_type_ids, len, 0));

        match (head, &ex.labels) {
            (HeadKind::Sequence, Labels::Single(label)) => labels.push(*label),
            (HeadKind::Sequence, Labels::Sequence(seq)) if seq.len() == 1 => labels.push(seq[0]),
            (HeadKind::Token, Labels::Sequence(seq)) => {
                ensure!(
                    seq.len() == ex.input_ids.len(),
                    "example {}: {} labels for {} tokens",
                    i,
                    seq.len(),
                    ex.input_ids.len()
                );
                labels.extend(pad_to(seq, len, 0));
            }
            (head, other) => {
                bail!("example {}: labels {:?} do not fit the {:?} head", i, other, head)
            }
        }
    }

    let device = Device::Cpu;
    let input_ids = Tensor::from_vec(input_ids, (b_sz, len), &device)?;
    let token_type_ids = Tensor::from_vec(token_type_ids, (b_sz, len), &device)?;
    let labels = match head {
        HeadKind::Sequence => Tensor::from_vec(labels, b_sz, &device)?,
        HeadKind::Token => Tensor::from_vec(labels, (b_sz, len), &device)?,
    };

    Ok(Batch {
        input_ids,
        token_type_ids,
        labels,
    })
}

fn pad_to(values: &[u32], len: usize, pad: u32) -> impl Iterator<Item = u32> + '_ {
    let kept = values.len().min(len);
    values[..kept]
        .iter()
        .copied()
        .chain(std::iter::repeat(pad).take(len - kept))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cfg(batch_size: usize, max_len: usize) -> DataConfig {
        DataConfig {
            batch_size,
            max_len,
            shuffle_seed: None,
            ..Default::default()
        }
    }

    fn seq_example(ids: &[u32], label: u32) -> Example {
        Example {
            input_ids: ids.to_vec(),
            token_type_ids: Vec::new(),
            labels: Labels::Single(label),
        }
    }

    #[test]
    fn test_pad_and_truncate() -> Result<()> {
        let examples = vec![
            seq_example(&[5, 6], 1),
            seq_example(&[1, 2, 3, 4, 5, 6], 0),
            seq_example(&[9], 1),
        ];
        let data = BatchedDataset::from_examples(examples, &cfg(2, 4), HeadKind::Sequence, None)?;

        // Last partial batch is kept
        assert_eq!(data.len(), 2);
        let batches: Vec<Batch> = data.iter().collect::<Result<_>>()?;
        assert_eq!(
            batches[0].input_ids.to_vec2::<u32>()?,
            vec![vec![5, 6, 0, 0], vec![1, 2, 3, 4]]
        );
        assert_eq!(batches[0].labels.to_vec1::<u32>()?, vec![1, 0]);
        assert_eq!(batches[1].size()?, 1);
        assert_eq!(batches[1].token_type_ids.dims(), &[1, 4]);
        Ok(())
    }

    #[test]
    fn test_dataset_iterates_like_its_batches() -> Result<()> {
        let examples: Vec<Example> = (1..=5).map(|i| seq_example(&[i], i % 2)).collect();
        let data = BatchedDataset::from_examples(examples, &cfg(2, 1), HeadKind::Sequence, None)?;

        let from_dataset: Vec<Batch> = DataSource::iter(&data).collect::<Result<_>>()?;
        let from_vec: Vec<Batch> = DataSource::iter(&data.batches).collect::<Result<_>>()?;
        assert_eq!(from_dataset.len(), 3);
        assert_eq!(from_vec.len(), 3);
        for (a, b) in from_dataset.as_slice().iter().zip(from_vec.as_slice().iter()) {
            assert_eq!(a.input_ids.to_vec2::<u32>()?, b.input_ids.to_vec2::<u32>()?);
        }
        assert_eq!(from_dataset[2].input_ids.to_vec2::<u32>()?, vec![vec![5]]);
        Ok(())
    }

    #[test]
    fn test_token_labels_must_match_tokens() {
        let bad = Example {
            input_ids: vec![1, 2, 3],
            token_type_ids: vec![],
            labels: Labels::Sequence(vec![0, 1]),
        };
        assert!(
            BatchedDataset::from_examples(vec![bad], &cfg(1, 4), HeadKind::Token, None).is_err()
        );

        let wrong_head = seq_example(&[1, 2], 1);
        assert!(
            BatchedDataset::from_examples(vec![wrong_head], &cfg(1, 4), HeadKind::Token, None)
                .is_err()
        );
    }

    #[test]
    fn test_shuffle_is_seeded() -> Result<()> {
        let examples: Vec<Example> = (1..=8).map(|i| seq_example(&[i], 0)).collect();
        let cfg = cfg(8, 1);
        let a = BatchedDataset::from_examples(examples.clone(), &cfg, HeadKind::Sequence, Some(7))?;
        let b = BatchedDataset::from_examples(examples, &cfg, HeadKind::Sequence, Some(7))?;

        let ids_a = a.batches[0].input_ids.flatten_all()?.to_vec1::<u32>()?;
        let ids_b = b.batches[0].input_ids.flatten_all()?.to_vec1::<u32>()?;
        assert_eq!(ids_a, ids_b);
        let mut sorted = ids_a.clone();
        sorted.sort();
        assert_eq!(sorted, (1..=8).collect::<Vec<u32>>());
        Ok(())
    }

    #[test]
    fn test_load_jsonl() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("train.jsonl");
        let mut file = File::create(&path)?;
        writeln!(
            file,
            r#"{{"input_ids": [2, 3, 4], "token_type_ids": [0, 0, 1], "labels": [1, 0, 2]}}"#
        )?;
        writeln!(file)?;
        writeln!(file, r#"{{"input_ids": [7], "labels": [1]}}"#)?;

        let data = BatchedDataset::from_jsonl(&path, &cfg(4, 3), HeadKind::Token, None)?;
        assert_eq!(data.num_examples, 2);
        let batch = data.iter().next().unwrap()?;
        assert_eq!(batch.labels.to_vec2::<u32>()?, vec![vec![1, 0, 2], vec![1, 0, 0]]);
        assert_eq!(
            batch.token_type_ids.to_vec2::<u32>()?,
            vec![vec![0, 0, 1], vec![0, 0, 0]]
        );

        writeln!(file, "not json")?;
        assert!(load_examples(&path).is_err());
        Ok(())
    }
}
