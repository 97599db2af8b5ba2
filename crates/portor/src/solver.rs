//! CAPTCHA solving by consensus over several OCR passes.
//!
//! Every image is recognized once per [`RecognitionMode`]; each pass runs as
//! its own tokio task. Results of the wrong length are discarded and the most
//! frequent remaining string wins, ties going to whichever was seen first.
//! A failed or panicked pass only removes a candidate.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;

use crate::ocr::{OcrEngine, RecognitionMode};

/// Number of characters in a registry CAPTCHA.
pub const CAPTCHA_LENGTH: usize = 4;

/// Fans OCR passes out over images and modes and votes on the result.
#[derive(Clone)]
pub struct CaptchaSolver {
    engine: Arc<dyn OcrEngine>,
    modes: Vec<RecognitionMode>,
}

impl CaptchaSolver {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self {
            engine,
            modes: RecognitionMode::ALL.to_vec(),
        }
    }

    /// Best guess for the CAPTCHA shown in `images`, or an empty string if
    /// no pass produced a plausible candidate.
    pub async fn solve(&self, images: &[Vec<u8>]) -> String {
        if images.is_empty() {
            tracing::warn!("CAPTCHA solver called without images");
            return String::new();
        }

        let mut tasks = Vec::with_capacity(images.len() * self.modes.len());
        for image in images {
            let image: Arc<[u8]> = Arc::from(image.as_slice());
            for &mode in &self.modes {
                let engine = Arc::clone(&self.engine);
                let image = Arc::clone(&image);
                tasks.push(tokio::spawn(async move {
                    engine.recognize(&image, mode).await
                }));
            }
        }

        let candidates = join_all(tasks)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(Ok(text)) => Some(text),
                Ok(Err(e)) => {
                    tracing::warn!("OCR pass failed: {e}");
                    None
                }
                Err(e) => {
                    tracing::warn!("OCR task aborted: {e}");
                    None
                }
            });

        let solution = pick_consensus(candidates);
        tracing::debug!(
            "CAPTCHA consensus over {} image(s): {:?}",
            images.len(),
            solution
        );
        solution
    }
}

/// Most frequent candidate of exactly [`CAPTCHA_LENGTH`] characters.
///
/// Ties are broken by first appearance. Returns an empty string when no
/// candidate has the right length.
pub fn pick_consensus<I>(candidates: I) -> String
where
    I: IntoIterator<Item = String>,
{
    // candidate -> (votes, first seen)
    let mut tally: HashMap<String, (usize, usize)> = HashMap::new();

    for (seen, candidate) in candidates
        .into_iter()
        .filter(|c| c.chars().count() == CAPTCHA_LENGTH)
        .enumerate()
    {
        tally.entry(candidate).or_insert((0, seen)).0 += 1;
    }

    tally
        .into_iter()
        .max_by(|(_, (votes_a, seen_a)), (_, (votes_b, seen_b))| {
            votes_a.cmp(votes_b).then(seen_b.cmp(seen_a))
        })
        .map(|(candidate, _)| candidate)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OcrError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_consensus_majority() {
        let picked = pick_consensus(strings(&["1234", "5678", "5678", "12"]));
        assert_eq!(picked, "5678");
    }

    #[test]
    fn test_consensus_tie_goes_to_first_seen() {
        let picked = pick_consensus(strings(&["1234", "5678", "5678", "1234"]));
        assert_eq!(picked, "1234");

        let picked = pick_consensus(strings(&["9999", "1111", "1111", "9999"]));
        assert_eq!(picked, "9999");
    }

    #[test]
    fn test_consensus_ignores_wrong_lengths() {
        let picked = pick_consensus(strings(&["123", "12345", "", "12345", "4321"]));
        assert_eq!(picked, "4321");
    }

    #[test]
    fn test_consensus_empty_when_no_candidate() {
        assert_eq!(pick_consensus(strings(&["123", "12345", ""])), "");
        assert_eq!(pick_consensus(Vec::new()), "");
    }

    #[test]
    fn test_consensus_result_length() {
        let inputs = [
            strings(&["1", "22", "333", "4444", "55555"]),
            strings(&["abcd", "abcd", "xyz"]),
            strings(&["čćšđ"]),
        ];
        for input in inputs {
            let picked = pick_consensus(input);
            assert_eq!(picked.chars().count(), CAPTCHA_LENGTH);
        }
    }

    /// Answers from a fixed table keyed by (image, mode), recording calls.
    struct ScriptedEngine {
        answers: HashMap<(Vec<u8>, u8), Result<String, String>>,
        calls: Mutex<Vec<(Vec<u8>, u8)>>,
    }

    #[async_trait]
    impl OcrEngine for ScriptedEngine {
        async fn recognize(&self, image: &[u8], mode: RecognitionMode) -> Result<String, OcrError> {
            let key = (image.to_vec(), mode.psm());
            self.calls.lock().unwrap().push(key.clone());
            match self.answers.get(&key) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(stderr)) => Err(OcrError::Exit {
                    status: "exit status: 1".into(),
                    stderr: stderr.clone(),
                }),
                None => Ok(String::new()),
            }
        }
    }

    #[tokio::test]
    async fn test_solve_runs_every_mode_per_image() {
        let engine = Arc::new(ScriptedEngine {
            answers: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        });
        let solver = CaptchaSolver::new(engine.clone());

        let solution = solver.solve(&[b"a".to_vec(), b"b".to_vec()]).await;
        assert_eq!(solution, "");

        let mut calls = engine.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                (b"a".to_vec(), 6),
                (b"a".to_vec(), 7),
                (b"a".to_vec(), 8),
                (b"b".to_vec(), 6),
                (b"b".to_vec(), 7),
                (b"b".to_vec(), 8),
            ]
        );
    }

    #[tokio::test]
    async fn test_solve_tolerates_failed_passes() {
        let answers = HashMap::from([
            ((b"a".to_vec(), 6), Err("Error in pixReadMem".to_string())),
            ((b"a".to_vec(), 7), Ok("4821".to_string())),
            ((b"a".to_vec(), 8), Ok("482".to_string())),
        ]);
        let engine = Arc::new(ScriptedEngine {
            answers,
            calls: Mutex::new(Vec::new()),
        });
        let solver = CaptchaSolver::new(engine);

        assert_eq!(solver.solve(&[b"a".to_vec()]).await, "4821");
    }

    #[tokio::test]
    async fn test_solve_votes_across_images() {
        let answers = HashMap::from([
            ((b"a".to_vec(), 6), Ok("1234".to_string())),
            ((b"a".to_vec(), 7), Ok("5678".to_string())),
            ((b"b".to_vec(), 6), Ok("5678".to_string())),
            ((b"b".to_vec(), 8), Ok("1234".to_string())),
        ]);
        let engine = Arc::new(ScriptedEngine {
            answers,
            calls: Mutex::new(Vec::new()),
        });
        let solver = CaptchaSolver::new(engine);

        assert_eq!(solver.solve(&[b"a".to_vec(), b"b".to_vec()]).await, "1234");
    }

    #[tokio::test]
    async fn test_solve_without_images() {
        let engine = Arc::new(ScriptedEngine {
            answers: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        });
        let solver = CaptchaSolver::new(engine.clone());
        assert_eq!(solver.solve(&[]).await, "");
        assert!(engine.calls.lock().unwrap().is_empty());
    }
}
