use std::path::Path;

use rand::Rng;
use tokenizers::tokenizer::Tokenizer;

use crate::console;
use crate::error::{BenchError, Result};

/// The tokenizer operations the benchmark needs: counting prompt and completion
/// tokens, and synthesising prompts from token ids.
pub trait TokenCodec: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, ids: &[u32]) -> Result<String>;

    fn vocab_size(&self) -> usize;

    fn count(&self, text: &str) -> Result<usize> {
        Ok(self.encode(text)?.len())
    }
}

/// A Hugging Face tokenizer, loaded from a local `tokenizer.json` or from the hub.
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    pub fn load(name_or_path: &str) -> Result<Self> {
        let loaded = if Path::new(name_or_path).is_file() {
            Tokenizer::from_file(name_or_path)
        } else {
            Tokenizer::from_pretrained(name_or_path, None)
        };
        let inner = loaded.map_err(|e| {
            BenchError::Tokenizer(format!("failed to load tokenizer {name_or_path}: {e}"))
        })?;
        Ok(Self { inner })
    }
}

impl TokenCodec for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| BenchError::Tokenizer(format!("failed to encode: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| BenchError::Tokenizer(format!("failed to decode: {e}")))
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }
}

/// Decodes `ids` and nudges the id sequence until the decoded text re-encodes to
/// `target` tokens, giving up after a fixed number of trials.
///
/// Returns the prompt and the token count it actually achieved.
pub fn fit_to_length<R: Rng + ?Sized>(
    codec: &dyn TokenCodec,
    mut ids: Vec<u32>,
    target: usize,
    rng: &mut R,
    verbose: bool,
) -> Result<(String, usize)> {
    let num_trials: usize = 10;
    let vocab_size = codec.vocab_size().max(1) as u32;
    let mut prompt = String::new();
    for trial in 0..num_trials {
        prompt = codec.decode(&ids)?;
        let check_len = codec.count(&prompt)?;
        if verbose {
            console::info(format!(
                "Trial: {trial} Target Prompt Length: {target}, Achieved Prompt Length: {check_len}"
            ));
        }
        if check_len == target {
            return Ok((prompt, check_len));
        } else if check_len > target {
            // Shrink faster than we grow so the loop cannot oscillate around the target.
            ids.pop();
            ids.pop();
        } else {
            ids.push(rng.gen_range(0..vocab_size));
        }
    }
    let achieved = codec.count(&prompt)?;
    if achieved != target {
        console::warning(format!(
            "Failed to get an encoding of the correct length. Expected {target}, got {achieved}"
        ));
    }
    Ok((prompt, achieved))
}


#[cfg(test)]
mod tests {
    use super::testing::WordCodec;
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn exact_codec_fits_immediately() {
        let codec = WordCodec::new();
        let mut rng = StdRng::seed_from_u64(0);
        let (prompt, len) = fit_to_length(&codec, vec![1, 2, 3, 4], 4, &mut rng, false).unwrap();
        assert_eq!(prompt, "t1 t2 t3 t4");
        assert_eq!(len, 4);
    }

    #[test]
    fn drifting_codec_converges_to_target() {
        let codec = WordCodec {
            vocab: 50,
            prefix: true,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let ids: Vec<u32> = (0..16).collect();
        let (prompt, len) = fit_to_length(&codec, ids, 16, &mut rng, false).unwrap();
        assert_eq!(len, 16);
        assert_eq!(codec.count(&prompt).unwrap(), 16);
    }
}
