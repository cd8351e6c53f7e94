//! ============================================================================
//! Speaker Classifier - Attribute transcript segments to known voices
//! ============================================================================
//! Each segment is cut into 30 second chunks. Every chunk is written to a
//! temporary WAV file and scored against every identity (best sample wins).
//! Chunk scores are summed per identity and the highest sum claims the
//! segment, the earlier reference winning ties. With no positive evidence
//! the owner keeps the segment when an owner profile exists.
//! ============================================================================

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::audio::WavAudio;
use super::references::{Identity, VoiceReference};
use super::verifier::VoiceVerifier;
use super::AudioError;
use crate::types::{ClassificationResult, TranscriptSegment};

pub const CHUNK_SECONDS: f64 = 30.0;

/// Split [start, end) into consecutive windows of at most CHUNK_SECONDS.
/// Empty or inverted spans yield no windows.
pub fn chunk_windows(start: f64, end: f64) -> Vec<(f64, f64)> {
    if !start.is_finite() || !end.is_finite() || end <= start {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut index = 0u32;
    loop {
        let from = start + index as f64 * CHUNK_SECONDS;
        if from >= end {
            break;
        }
        windows.push((from, (from + CHUNK_SECONDS).min(end)));
        index += 1;
    }
    windows
}

pub struct SpeakerClassifier {
    verifier: Arc<dyn VoiceVerifier>,
    workers: usize,
}

impl SpeakerClassifier {
    pub fn new(verifier: Arc<dyn VoiceVerifier>) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self { verifier, workers }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// One result per segment, in segment order
    pub async fn classify(
        &self,
        audio_wav: &[u8],
        references: &[VoiceReference],
        segments: &[TranscriptSegment],
    ) -> Result<Vec<ClassificationResult>, AudioError> {
        let mut results = vec![ClassificationResult::unattributed(); segments.len()];
        if references.is_empty() || segments.is_empty() {
            debug!("No voice references, leaving {} segments unattributed", segments.len());
            return Ok(results);
        }

        let audio = Arc::new(WavAudio::decode(audio_wav)?);
        let references = Arc::new(references.to_vec());
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for (index, segment) in segments.iter().enumerate() {
            let (start, end) = (segment.start, segment.end);
            if chunk_windows(start, end).is_empty() {
                continue;
            }

            let audio = audio.clone();
            let references = references.clone();
            let verifier = self.verifier.clone();
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AudioError::Model(format!("Scoring pool closed: {}", e)))?;
                let totals = tokio::task::spawn_blocking(move || {
                    score_segment(&audio, &references, verifier.as_ref(), start, end)
                })
                .await
                .map_err(|e| AudioError::Model(format!("Scoring task failed: {}", e)))?;
                Ok::<_, AudioError>((index, totals))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((index, totals))) => results[index] = pick_identity(&references, &totals),
                Ok(Err(e)) => warn!("Segment scoring failed: {}", e),
                Err(e) => warn!("Segment scoring task aborted: {}", e),
            }
        }

        let attributed = results
            .iter()
            .filter(|r| r.is_user || r.person_id.is_some())
            .count();
        info!(
            "Classified {} of {} segments against {} voice references",
            attributed,
            segments.len(),
            references.len()
        );

        Ok(results)
    }
}

/// Summed score per reference across the segment's chunks
fn score_segment(
    audio: &WavAudio,
    references: &[VoiceReference],
    verifier: &dyn VoiceVerifier,
    start: f64,
    end: f64,
) -> Vec<f32> {
    let mut totals = vec![0.0f32; references.len()];
    let (sample_owner, sample_paths): (Vec<usize>, Vec<&Path>) = references
        .iter()
        .enumerate()
        .flat_map(|(index, reference)| reference.samples.iter().map(move |s| (index, s.path())))
        .unzip();

    for (from, to) in chunk_windows(start, end) {
        let chunk = audio.slice_seconds(from, to);
        if chunk.samples.is_empty() {
            continue;
        }

        // Removed when `file` drops at the end of this iteration
        let file = match write_chunk(&chunk) {
            Ok(file) => file,
            Err(e) => {
                warn!("Failed to write audio chunk {:.1}-{:.1}s: {}", from, to, e);
                continue;
            }
        };

        let scores = verifier.score_many(file.path(), &sample_paths);
        let mut best = vec![0.0f32; references.len()];
        for ((owner, path), score) in sample_owner.iter().zip(&sample_paths).zip(scores) {
            match score {
                Ok(score) => best[*owner] = best[*owner].max(score),
                Err(e) => warn!(
                    "Voice verification failed for {:?} ({}) on chunk {:.1}-{:.1}s: {}",
                    references[*owner].identity,
                    path.display(),
                    from,
                    to,
                    e
                ),
            }
        }
        for (slot, score) in totals.iter_mut().zip(best) {
            *slot += score;
        }
    }

    totals
}

fn write_chunk(chunk: &WavAudio) -> Result<NamedTempFile, AudioError> {
    let mut file = tempfile::Builder::new()
        .prefix("segment-chunk-")
        .suffix(".wav")
        .tempfile()?;
    file.write_all(&chunk.encode())?;
    file.flush()?;
    Ok(file)
}

/// Highest total wins and the earlier reference wins a tie, so all-zero
/// totals go to the first reference. A person is only named on positive
/// evidence; the owner needs none.
fn pick_identity(references: &[VoiceReference], totals: &[f32]) -> ClassificationResult {
    let mut best: Option<(usize, f32)> = None;
    for (index, total) in totals.iter().enumerate() {
        match best {
            Some((_, top)) if *total <= top => {}
            _ => best = Some((index, *total)),
        }
    }

    match best.map(|(index, total)| (&references[index].identity, total)) {
        Some((Identity::User, _)) => ClassificationResult::user(),
        Some((Identity::Person(id), total)) if total > 0.0 => ClassificationResult::person(id.clone()),
        _ => ClassificationResult::unattributed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speaker::references::VoiceSample;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    const RATE: u32 = 10;

    /// Audio whose level encodes the 30 second chunk it belongs to:
    /// chunk k is a constant 0.1 * (k + 1)
    fn stepped_audio(seconds: usize) -> Vec<u8> {
        let samples = (0..seconds * RATE as usize)
            .map(|i| {
                let chunk = i / (30 * RATE as usize);
                0.1 * (chunk + 1) as f32
            })
            .collect();
        WavAudio::new(RATE, samples).encode()
    }

    fn chunk_index(path: &Path) -> usize {
        let audio = WavAudio::read_file(path).unwrap();
        let mean = audio.samples.iter().sum::<f32>() / audio.samples.len() as f32;
        (mean * 10.0).round() as usize - 1
    }

    /// Scores keyed by reference file name, one entry per chunk.
    /// Missing entries fail verification.
    struct ScriptedVerifier {
        scores: HashMap<String, Vec<f32>>,
        seen_chunks: Mutex<Vec<PathBuf>>,
    }

    impl ScriptedVerifier {
        fn new(scores: &[(&str, Vec<f32>)]) -> Arc<Self> {
            Arc::new(Self {
                scores: scores
                    .iter()
                    .map(|(name, s)| (name.to_string(), s.clone()))
                    .collect(),
                seen_chunks: Mutex::new(Vec::new()),
            })
        }
    }

    impl VoiceVerifier for ScriptedVerifier {
        fn score(&self, chunk: &Path, reference: &Path) -> Result<f32, AudioError> {
            assert!(chunk.exists());
            self.seen_chunks.lock().unwrap().push(chunk.to_path_buf());
            let name = reference.file_name().unwrap().to_string_lossy().to_string();
            let scores = self
                .scores
                .get(&name)
                .ok_or_else(|| AudioError::Model(format!("no model for {}", name)))?;
            Ok(scores[chunk_index(chunk)])
        }
    }

    fn reference(identity: Identity, names: &[&str]) -> VoiceReference {
        VoiceReference::new(
            identity,
            names.iter().map(|n| VoiceSample::from_path(format!("/refs/{}", n))).collect(),
        )
    }

    fn user_and_alice() -> Vec<VoiceReference> {
        vec![
            reference(Identity::User, &["user.wav"]),
            reference(Identity::Person("alice".into()), &["alice.wav"]),
        ]
    }

    #[test]
    fn test_chunk_windows() {
        assert_eq!(chunk_windows(0.0, 65.0), vec![(0.0, 30.0), (30.0, 60.0), (60.0, 65.0)]);
        assert_eq!(chunk_windows(10.0, 20.0), vec![(10.0, 20.0)]);
        assert_eq!(chunk_windows(0.0, 60.0).len(), 2);
        assert!(chunk_windows(5.0, 5.0).is_empty());
        assert!(chunk_windows(5.0, 1.0).is_empty());
    }

    #[tokio::test]
    async fn test_no_references_skips_decoding() {
        let verifier = ScriptedVerifier::new(&[]);
        let classifier = SpeakerClassifier::new(verifier);
        let segments = vec![TranscriptSegment::new("hi", "SPEAKER_00", 0.0, 5.0)];

        let results = classifier.classify(b"not audio", &[], &segments).await.unwrap();
        assert_eq!(results, vec![ClassificationResult::unattributed()]);
    }

    #[tokio::test]
    async fn test_zero_evidence_goes_to_owner() {
        let verifier = ScriptedVerifier::new(&[("user.wav", vec![0.0]), ("alice.wav", vec![0.0])]);
        let classifier = SpeakerClassifier::new(verifier);
        let segments = vec![TranscriptSegment::new("hi", "SPEAKER_00", 0.0, 10.0)];

        let results = classifier
            .classify(&stepped_audio(30), &user_and_alice(), &segments)
            .await
            .unwrap();
        assert_eq!(results, vec![ClassificationResult::user()]);
    }

    #[tokio::test]
    async fn test_zero_evidence_without_owner_profile_stays_unattributed() {
        let verifier = ScriptedVerifier::new(&[("alice.wav", vec![0.0]), ("bob.wav", vec![0.0])]);
        let references = vec![
            reference(Identity::Person("alice".into()), &["alice.wav"]),
            reference(Identity::Person("bob".into()), &["bob.wav"]),
        ];
        let classifier = SpeakerClassifier::new(verifier);
        let segments = vec![TranscriptSegment::new("hi", "SPEAKER_00", 0.0, 10.0)];

        let results = classifier
            .classify(&stepped_audio(30), &references, &segments)
            .await
            .unwrap();
        assert_eq!(results, vec![ClassificationResult::unattributed()]);
    }

    #[tokio::test]
    async fn test_scores_are_summed_not_averaged() {
        // User totals 1.1, alice totals 1.0; alice wins on average but not on sum
        let verifier = ScriptedVerifier::new(&[
            ("user.wav", vec![0.9, 0.1, 0.1]),
            ("alice.wav", vec![0.0, 0.5, 0.5]),
        ]);
        let classifier = SpeakerClassifier::new(verifier).with_workers(2);
        let segments = vec![TranscriptSegment::new("long", "SPEAKER_00", 0.0, 90.0)];

        let results = classifier
            .classify(&stepped_audio(90), &user_and_alice(), &segments)
            .await
            .unwrap();
        assert_eq!(results, vec![ClassificationResult::user()]);
    }

    #[tokio::test]
    async fn test_best_sample_per_identity() {
        let verifier = ScriptedVerifier::new(&[
            ("user.wav", vec![0.4]),
            ("alice-1.wav", vec![0.1]),
            ("alice-2.wav", vec![0.6]),
        ]);
        let references = vec![
            reference(Identity::User, &["user.wav"]),
            reference(Identity::Person("alice".into()), &["alice-1.wav", "alice-2.wav"]),
        ];
        let classifier = SpeakerClassifier::new(verifier);
        let segments = vec![TranscriptSegment::new("hi", "SPEAKER_01", 0.0, 20.0)];

        let results = classifier
            .classify(&stepped_audio(30), &references, &segments)
            .await
            .unwrap();
        assert_eq!(results, vec![ClassificationResult::person("alice")]);
    }

    #[tokio::test]
    async fn test_failed_verification_counts_as_zero() {
        // No script for alice.wav, every call for alice fails
        let verifier = ScriptedVerifier::new(&[("user.wav", vec![0.2])]);
        let classifier = SpeakerClassifier::new(verifier);
        let segments = vec![TranscriptSegment::new("hi", "SPEAKER_00", 0.0, 10.0)];

        let results = classifier
            .classify(&stepped_audio(30), &user_and_alice(), &segments)
            .await
            .unwrap();
        assert_eq!(results, vec![ClassificationResult::user()]);
    }

    #[tokio::test]
    async fn test_tie_goes_to_first_reference() {
        let verifier = ScriptedVerifier::new(&[("user.wav", vec![0.5]), ("alice.wav", vec![0.5])]);
        let classifier = SpeakerClassifier::new(verifier);
        let segments = vec![TranscriptSegment::new("hi", "SPEAKER_00", 0.0, 10.0)];

        let results = classifier
            .classify(&stepped_audio(30), &user_and_alice(), &segments)
            .await
            .unwrap();
        assert_eq!(results, vec![ClassificationResult::user()]);
    }

    #[tokio::test]
    async fn test_results_follow_segment_order() {
        let verifier = ScriptedVerifier::new(&[
            ("user.wav", vec![0.8, 0.0, 0.0]),
            ("alice.wav", vec![0.0, 0.7, 0.0]),
        ]);
        let classifier = SpeakerClassifier::new(verifier).with_workers(1);
        let segments = vec![
            TranscriptSegment::new("a", "SPEAKER_00", 0.0, 30.0),
            TranscriptSegment::new("b", "SPEAKER_01", 30.0, 60.0),
            TranscriptSegment::new("c", "SPEAKER_02", 60.0, 90.0),
            TranscriptSegment::new("d", "SPEAKER_02", 70.0, 70.0),
        ];

        let results = classifier
            .classify(&stepped_audio(90), &user_and_alice(), &segments)
            .await
            .unwrap();
        assert_eq!(
            results,
            vec![
                ClassificationResult::user(),
                ClassificationResult::person("alice"),
                // No evidence either way
                ClassificationResult::user(),
                // Zero length, never scored
                ClassificationResult::unattributed(),
            ]
        );
    }

    #[tokio::test]
    async fn test_chunk_files_are_removed() {
        let verifier = ScriptedVerifier::new(&[
            ("user.wav", vec![0.3, 0.3, 0.3]),
            ("alice.wav", vec![0.1, 0.1, 0.1]),
        ]);
        let classifier = SpeakerClassifier::new(verifier.clone());
        let segments = vec![TranscriptSegment::new("long", "SPEAKER_00", 0.0, 75.0)];

        classifier
            .classify(&stepped_audio(90), &user_and_alice(), &segments)
            .await
            .unwrap();

        let seen = verifier.seen_chunks.lock().unwrap();
        // Three chunks, two references each
        assert_eq!(seen.len(), 6);
        assert!(seen.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn test_invalid_audio_with_references_is_an_error() {
        let verifier = ScriptedVerifier::new(&[]);
        let classifier = SpeakerClassifier::new(verifier);
        let segments = vec![TranscriptSegment::new("hi", "SPEAKER_00", 0.0, 5.0)];

        let result = classifier.classify(b"garbage", &user_and_alice(), &segments).await;
        assert!(matches!(result, Err(AudioError::InvalidWav(_))));
    }
}
