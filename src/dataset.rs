use std::fs;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;

use crate::config::DatasetSource;
use crate::console;
use crate::error::{BenchError, Result};
use crate::request::RequestRecord;
use crate::tokenizer::{fit_to_length, TokenCodec};

/// Prompts or completions shorter than this are dropped from ShareGPT samples.
const MIN_SEQUENCE_LEN: usize = 4;

#[derive(Deserialize)]
struct ShareGptEntry {
    #[serde(default)]
    conversations: Vec<ShareGptTurn>,
}

#[derive(Deserialize)]
struct ShareGptTurn {
    value: String,
}

#[derive(Deserialize)]
struct JsonlPrompt {
    prompt: String,
    #[serde(default)]
    output_len: Option<usize>,
}

/// Draws `num_prompts` requests from the configured dataset.
pub fn load_requests<R: Rng + ?Sized>(
    source: &DatasetSource,
    num_prompts: usize,
    codec: &dyn TokenCodec,
    rng: &mut R,
    verbose: bool,
) -> Result<Vec<RequestRecord>> {
    let requests = match source {
        DatasetSource::ShareGpt {
            path,
            max_token_length,
            output_len,
        } => {
            let contents = read_dataset(path)?;
            sample_sharegpt(
                &contents,
                num_prompts,
                codec,
                *max_token_length,
                *output_len,
                rng,
            )?
        }
        DatasetSource::Jsonl { path, output_len } => {
            let contents = read_dataset(path)?;
            sample_jsonl(&contents, num_prompts, codec, *output_len)?
        }
        DatasetSource::Random {
            input_len,
            output_len,
            range_ratio,
        } => sample_random(
            num_prompts,
            codec,
            *input_len,
            *output_len,
            *range_ratio,
            rng,
            verbose,
        )?,
    };
    if requests.len() < num_prompts {
        return Err(BenchError::dataset(format!(
            "dataset yielded only {} usable prompts, {} requested",
            requests.len(),
            num_prompts
        )));
    }
    let total_input: usize = requests.iter().map(|r| r.prompt_len).sum();
    console::setting("Sampled prompts", requests.len());
    console::setting("Total input tokens", total_input);
    Ok(requests)
}

fn read_dataset(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| BenchError::dataset(format!("failed to read {}: {e}", path.display())))
}

/// Samples (prompt, completion) pairs from the first two turns of ShareGPT
/// conversations, pruning pairs that are too short or exceed `max_token_length`.
pub fn sample_sharegpt<R: Rng + ?Sized>(
    contents: &str,
    num_prompts: usize,
    codec: &dyn TokenCodec,
    max_token_length: usize,
    fixed_output_len: Option<usize>,
    rng: &mut R,
) -> Result<Vec<RequestRecord>> {
    let entries: Vec<ShareGptEntry> = serde_json::from_str(contents)
        .map_err(|e| BenchError::dataset(format!("invalid ShareGPT JSON: {e}")))?;
    let mut pairs: Vec<(String, String)> = entries
        .into_iter()
        .filter(|entry| entry.conversations.len() >= 2)
        .map(|entry| {
            let mut turns = entry.conversations.into_iter();
            let prompt = turns.next().map(|t| t.value).unwrap_or_default();
            let completion = turns.next().map(|t| t.value).unwrap_or_default();
            (prompt, completion)
        })
        .collect();
    pairs.shuffle(rng);

    let mut requests = Vec::with_capacity(num_prompts);
    for (prompt, completion) in pairs {
        if requests.len() == num_prompts {
            break;
        }
        let prompt_len = codec.count(&prompt)?;
        let output_len = match fixed_output_len {
            Some(len) => len,
            None => codec.count(&completion)?,
        };
        if prompt_len < MIN_SEQUENCE_LEN || output_len < MIN_SEQUENCE_LEN {
            continue;
        }
        if prompt_len + output_len > max_token_length {
            continue;
        }
        requests.push(RequestRecord {
            id: requests.len(),
            prompt,
            prompt_len,
            output_len,
        });
    }
    Ok(requests)
}

/// Reads `{"prompt": ..., "output_len": ...}` objects, one per line, in file order.
pub fn sample_jsonl(
    contents: &str,
    num_prompts: usize,
    codec: &dyn TokenCodec,
    fixed_output_len: Option<usize>,
) -> Result<Vec<RequestRecord>> {
    let mut requests = Vec::with_capacity(num_prompts);
    for (idx, line) in contents.lines().enumerate() {
        if requests.len() == num_prompts {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: JsonlPrompt = serde_json::from_str(trimmed)
            .map_err(|e| BenchError::dataset(format!("line {} is not a valid prompt: {e}", idx + 1)))?;
        let output_len = fixed_output_len.or(entry.output_len).ok_or_else(|| {
            BenchError::dataset(format!(
                "line {} has no output_len and --output-len is not set",
                idx + 1
            ))
        })?;
        let prompt_len = codec.count(&entry.prompt)?;
        requests.push(RequestRecord {
            id: requests.len(),
            prompt: entry.prompt,
            prompt_len,
            output_len,
        });
    }
    Ok(requests)
}

fn ranged_len<R: Rng + ?Sized>(len: usize, range_ratio: f64, rng: &mut R) -> usize {
    let low = ((len as f64 * range_ratio) as usize).clamp(1, len);
    rng.gen_range(low..=len)
}

/// Builds prompts from consecutive token ids at random offsets in the vocabulary.
pub fn sample_random<R: Rng + ?Sized>(
    num_prompts: usize,
    codec: &dyn TokenCodec,
    input_len: usize,
    output_len: usize,
    range_ratio: f64,
    rng: &mut R,
    verbose: bool,
) -> Result<Vec<RequestRecord>> {
    let vocab_size = codec.vocab_size();
    if vocab_size == 0 {
        return Err(BenchError::Tokenizer("tokenizer has an empty vocabulary".to_string()));
    }
    let mut requests = Vec::with_capacity(num_prompts);
    for id in 0..num_prompts {
        let target = ranged_len(input_len, range_ratio, rng);
        let output_len = ranged_len(output_len, range_ratio, rng);
        let offset = rng.gen_range(0..vocab_size);
        let ids: Vec<u32> = (0..target)
            .map(|j| ((offset + id + j) % vocab_size) as u32)
            .collect();
        let (prompt, prompt_len) = fit_to_length(codec, ids, target, rng, verbose)?;
        requests.push(RequestRecord {
            id,
            prompt,
            prompt_len,
            output_len,
        });
    }
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::testing::WordCodec;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("t{i}")).collect::<Vec<_>>().join(" ")
    }

    fn sharegpt(pairs: &[(usize, usize)]) -> String {
        let entries: Vec<serde_json::Value> = pairs
            .iter()
            .map(|&(p, c)| {
                serde_json::json!({
                    "id": "x",
                    "conversations": [
                        {"from": "human", "value": words(p)},
                        {"from": "gpt", "value": words(c)}
                    ]
                })
            })
            .collect();
        serde_json::to_string(&entries).unwrap()
    }

    #[test]
    fn sharegpt_prunes_short_and_long_pairs() {
        let contents = sharegpt(&[(2, 10), (10, 2), (1500, 600), (10, 20), (30, 40)]);
        let mut rng = StdRng::seed_from_u64(1);
        let requests =
            sample_sharegpt(&contents, 10, &WordCodec::new(), 2048, None, &mut rng).unwrap();
        let mut lens: Vec<(usize, usize)> =
            requests.iter().map(|r| (r.prompt_len, r.output_len)).collect();
        lens.sort();
        assert_eq!(lens, vec![(10, 20), (30, 40)]);
        let ids: Vec<usize> = requests.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn sharegpt_skips_single_turn_conversations_and_honours_output_override() {
        let contents = r#"[
            {"conversations": [{"from": "human", "value": "t1 t2 t3 t4 t5"}]},
            {"conversations": [
                {"from": "human", "value": "t1 t2 t3 t4 t5"},
                {"from": "gpt", "value": "t1"}
            ]}
        ]"#;
        let mut rng = StdRng::seed_from_u64(1);
        let requests =
            sample_sharegpt(contents, 5, &WordCodec::new(), 2048, Some(64), &mut rng).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt_len, 5);
        assert_eq!(requests[0].output_len, 64);
    }

    #[test]
    fn sharegpt_rejects_invalid_json() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            sample_sharegpt("{", 1, &WordCodec::new(), 2048, None, &mut rng),
            Err(BenchError::Dataset(_))
        ));
    }

    #[test]
    fn jsonl_reads_prompts_in_order() {
        let contents = "{\"prompt\": \"t1 t2\", \"output_len\": 8}\n\n{\"prompt\": \"t3\"}\n";
        let requests = sample_jsonl(contents, 5, &WordCodec::new(), Some(4)).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].output_len, 4);
        assert_eq!(requests[1].prompt_len, 1);

        let err = sample_jsonl("{\"prompt\": \"t3\"}", 1, &WordCodec::new(), None);
        assert!(matches!(err, Err(BenchError::Dataset(_))));
    }

    #[test]
    fn random_prompts_hit_requested_lengths() {
        let mut rng = StdRng::seed_from_u64(3);
        let requests =
            sample_random(8, &WordCodec::new(), 32, 16, 1.0, &mut rng, false).unwrap();
        assert_eq!(requests.len(), 8);
        for r in &requests {
            assert_eq!(r.prompt_len, 32);
            assert_eq!(r.output_len, 16);
        }
    }

    #[test]
    fn random_range_ratio_bounds_lengths() {
        let mut rng = StdRng::seed_from_u64(5);
        let requests =
            sample_random(50, &WordCodec::new(), 100, 40, 0.5, &mut rng, false).unwrap();
        for r in &requests {
            assert!((50..=100).contains(&r.prompt_len));
            assert!((20..=40).contains(&r.output_len));
        }
    }

    #[test]
    fn too_few_prompts_is_a_dataset_error() {
        let dir = std::env::temp_dir().join(format!("serving-bench-ds-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("prompts.jsonl");
        fs::write(&path, "{\"prompt\": \"t1 t2\", \"output_len\": 8}\n").unwrap();
        let source = DatasetSource::Jsonl {
            path: path.clone(),
            output_len: None,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let result = load_requests(&source, 3, &WordCodec::new(), &mut rng, false);
        assert!(matches!(result, Err(BenchError::Dataset(_))));
        fs::remove_dir_all(&dir).unwrap();
    }
}
