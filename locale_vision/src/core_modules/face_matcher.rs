// THEORY:
// The Biometric Matcher answers one question: do the faces in two images belong
// to the same person? It is a straight pipeline with no recovery paths:
//
// 1.  **Concurrent retrieval**: both locators are fetched at the same time and
//     joined. If either fetch fails the whole call fails with that `FetchError`.
// 2.  **Per-image analysis**: each image is decoded, its faces are detected, the
//     single prominent subject is isolated, cropped and embedded. All of the
//     CPU-heavy steps run on the `InferencePool`; the two images proceed
//     concurrently.
// 3.  **Decision**: cosine similarity of the two embeddings is the confidence,
//     and the match is `confidence >= MATCH_THRESHOLD`.
//
// A failure at any stage is reported as that stage's error. There is no default
// confidence: a call either produces a real similarity or an error.

use crate::context::AnalysisContext;
use crate::core_modules::face_isolation::face_isolation::{crop_face, isolate_single_face};
use crate::core_modules::fetcher::FetchResult;
use crate::core_modules::resource::ResourceLocator;
use crate::core_modules::similarity::cosine_similarity;
use crate::error::{AnalysisError, Stage};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Similarity at or above which two faces are declared a match.
pub const MATCH_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceMatchResult {
    #[serde(rename = "match")]
    pub is_match: bool,
    /// Raw cosine similarity of the two face embeddings.
    pub confidence: f64,
    pub threshold: f64,
}

impl FaceMatchResult {
    pub fn from_confidence(confidence: f64) -> Self {
        Self {
            is_match: confidence >= MATCH_THRESHOLD,
            confidence,
            threshold: MATCH_THRESHOLD,
        }
    }
}

pub mod face_matcher {
    use super::*;

    /// Compares the single faces found behind `first` and `second`.
    pub async fn match_faces(
        ctx: &AnalysisContext,
        first: &ResourceLocator,
        second: &ResourceLocator,
        deadline: Instant,
    ) -> Result<FaceMatchResult, AnalysisError> {
        let fetcher = ctx.fetcher();
        let allow_rendering = ctx.config().matcher.render_images;
        let timeout = ctx.config().fetch.direct_timeout;

        // --- 1. Concurrent retrieval ---
        let (first_image, second_image) = futures::future::try_join(
            fetcher.fetch_by(first, allow_rendering, timeout, deadline),
            fetcher.fetch_by(second, allow_rendering, timeout, deadline),
        )
        .await?;
        debug!(%first, %second, "both images retrieved");

        // --- 2. Per-image analysis ---
        let (first_embedding, second_embedding) = futures::future::try_join(
            embed_subject(ctx, &first_image, deadline),
            embed_subject(ctx, &second_image, deadline),
        )
        .await?;

        // --- 3. Decision ---
        let confidence = cosine_similarity(&first_embedding, &second_embedding)
            .map_err(|source| AnalysisError::model(Stage::Similarity, source))?;
        let result = FaceMatchResult::from_confidence(confidence);
        info!(%first, %second, confidence, is_match = result.is_match, "face match decided");
        Ok(result)
    }

    /// Decode, detect, isolate, crop and embed the subject of one image.
    async fn embed_subject(
        ctx: &AnalysisContext,
        fetched: &FetchResult,
        deadline: Instant,
    ) -> Result<Vec<f32>, AnalysisError> {
        let settings = &ctx.config().matcher;
        let image = Arc::new(ctx.decode(fetched, deadline).await?);

        let detector = Arc::clone(&ctx.models().detector);
        let scanned = Arc::clone(&image);
        let candidates = ctx
            .pool()
            .infer(Stage::Detection, deadline, move || detector.detect(&scanned))
            .await?;

        let subject = isolate_single_face(&candidates, settings.min_detection_score, settings.prominence_ratio)
            .map_err(|failure| AnalysisError::Detection {
                locator: fetched.locator.clone(),
                failure,
            })?;
        debug!(locator = %fetched.locator, candidates = candidates.len(), ?subject, "subject face isolated");

        let embedder = Arc::clone(&ctx.models().embedder);
        let margin = settings.face_margin;
        ctx.pool()
            .infer(Stage::Embedding, deadline, move || {
                let face = crop_face(&image, &subject, margin, embedder.input_size())?;
                embedder.embed(&face)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::face_matcher::match_faces;
    use super::*;
    use crate::error::{DetectionFailure, FetchCause};
    use crate::test_support::{
        models, test_config, test_context, test_context_with, uniform_png, DirectBehavior, FakeEmbedder, FakeOcr,
        FakeRetriever, NO_FACE, ONE_DOMINANT_FACE, ONE_FACE, ONE_WEAK_FACE, TWO_EQUAL_FACES,
    };
    use std::time::Duration;

    const ALICE: [u8; 3] = [ONE_FACE, 100, 100];
    const ALICE_AGAIN: [u8; 3] = [ONE_FACE, 110, 100];
    const STRANGER: [u8; 3] = [ONE_FACE, 200, 50];
    const BORDERLINE: [u8; 3] = [ONE_FACE, 50, 200];
    const CROWD: [u8; 3] = [TWO_EQUAL_FACES, 0, 0];
    const PORTRAIT_WITH_BYSTANDER: [u8; 3] = [ONE_DOMINANT_FACE, 60, 60];
    const EMPTY_ROOM: [u8; 3] = [NO_FACE, 0, 0];
    const BLURRY: [u8; 3] = [ONE_WEAK_FACE, 0, 0];

    fn embeddings() -> FakeEmbedder {
        FakeEmbedder::new(vec![
            (ALICE, vec![1.0, 0.0]),
            (ALICE_AGAIN, vec![0.82, (1.0f32 - 0.82 * 0.82).sqrt()]),
            (STRANGER, vec![0.31, (1.0f32 - 0.31 * 0.31).sqrt()]),
            (BORDERLINE, vec![3.0, 4.0]),
            (PORTRAIT_WITH_BYSTANDER, vec![0.0, 1.0]),
        ])
    }

    fn image(color: [u8; 3]) -> DirectBehavior {
        DirectBehavior::Respond(200, uniform_png(color))
    }

    fn library() -> FakeRetriever {
        FakeRetriever::routes(vec![
            ("https://ids.example/alice.png", image(ALICE)),
            ("https://ids.example/alice-again.png", image(ALICE_AGAIN)),
            ("https://ids.example/stranger.png", image(STRANGER)),
            ("https://ids.example/borderline.png", image(BORDERLINE)),
            ("https://ids.example/crowd.png", image(CROWD)),
            ("https://ids.example/portrait.png", image(PORTRAIT_WITH_BYSTANDER)),
            ("https://ids.example/empty.png", image(EMPTY_ROOM)),
            ("https://ids.example/blurry.png", image(BLURRY)),
            ("https://ids.example/page.html", DirectBehavior::Respond(200, b"<html></html>".to_vec())),
        ])
    }

    async fn compare(first: &str, second: &str) -> Result<FaceMatchResult, AnalysisError> {
        let ctx = test_context(library(), models(embeddings(), FakeOcr::reading(&[])));
        let deadline = ctx.deadline_after(Duration::from_secs(5));
        match_faces(&ctx, &first.into(), &second.into(), deadline).await
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(FaceMatchResult::from_confidence(0.6).is_match);
        assert!(!FaceMatchResult::from_confidence(0.5999).is_match);
        assert_eq!(FaceMatchResult::from_confidence(0.9).threshold, MATCH_THRESHOLD);
    }

    #[test]
    fn serializes_with_the_match_key() {
        let json = serde_json::to_value(FaceMatchResult::from_confidence(0.75)).unwrap();
        assert_eq!(json["match"], true);
        assert_eq!(json["confidence"], 0.75);
        assert_eq!(json["threshold"], 0.6);
    }

    #[tokio::test]
    async fn same_person_matches() {
        let result = compare("https://ids.example/alice.png", "https://ids.example/alice-again.png")
            .await
            .expect("compared");
        assert!(result.is_match);
        assert!((result.confidence - 0.82).abs() < 1e-6);
    }

    #[tokio::test]
    async fn different_people_do_not_match() {
        let result = compare("https://ids.example/alice.png", "https://ids.example/stranger.png")
            .await
            .expect("compared");
        assert!(!result.is_match);
        assert!((result.confidence - 0.31).abs() < 1e-6);
    }

    #[tokio::test]
    async fn similarity_at_the_threshold_matches() {
        let result = compare("https://ids.example/alice.png", "https://ids.example/borderline.png")
            .await
            .expect("compared");
        assert_eq!(result.confidence, 0.6);
        assert!(result.is_match);
    }

    #[tokio::test]
    async fn repeated_comparisons_are_identical() {
        let first = compare("https://ids.example/alice.png", "https://ids.example/stranger.png")
            .await
            .expect("compared");
        let second = compare("https://ids.example/alice.png", "https://ids.example/stranger.png")
            .await
            .expect("compared");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn a_dominant_face_is_chosen_over_a_bystander() {
        let result = compare("https://ids.example/portrait.png", "https://ids.example/alice.png")
            .await
            .expect("compared");
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn images_without_a_usable_face_are_detection_errors() {
        for (locator, expected) in [
            ("https://ids.example/empty.png", DetectionFailure::NoFace),
            ("https://ids.example/blurry.png", DetectionFailure::NoFace),
            (
                "https://ids.example/crowd.png",
                DetectionFailure::AmbiguousMultiFace { candidates: 2 },
            ),
        ] {
            match compare("https://ids.example/alice.png", locator).await {
                Err(AnalysisError::Detection { locator: failed, failure }) => {
                    assert_eq!(failed.as_str(), locator);
                    assert_eq!(failure, expected);
                }
                other => panic!("expected a detection error for {locator}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn undecodable_content_names_its_locator() {
        match compare("https://ids.example/page.html", "https://ids.example/alice.png").await {
            Err(AnalysisError::Decode { locator, .. }) => assert_eq!(locator.as_str(), "https://ids.example/page.html"),
            other => panic!("expected a decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn a_failed_fetch_fails_the_comparison() {
        match compare("https://ids.example/alice.png", "https://unreachable.invalid/x.png").await {
            Err(AnalysisError::Fetch(error)) => {
                assert_eq!(error.cause(), FetchCause::Network);
                assert!(!error.rendering_attempted());
            }
            other => panic!("expected a fetch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn both_images_are_fetched_at_the_same_time() {
        let delay = Duration::from_millis(200);
        let retriever = FakeRetriever::routes(vec![
            ("https://slow.example/a.png", DirectBehavior::RespondAfter(delay, 200, uniform_png(ALICE))),
            ("https://slow.example/b.png", DirectBehavior::RespondAfter(delay, 200, uniform_png(ALICE_AGAIN))),
        ]);
        let mut config = test_config();
        config.fetch.direct_timeout = Duration::from_secs(5);
        let ctx = test_context_with(config, retriever, models(embeddings(), FakeOcr::reading(&[])));

        let started = std::time::Instant::now();
        let result = match_faces(
            &ctx,
            &"https://slow.example/a.png".into(),
            &"https://slow.example/b.png".into(),
            ctx.deadline_after(Duration::from_secs(5)),
        )
        .await
        .expect("compared");

        assert!(result.is_match);
        assert!(started.elapsed() < delay * 2, "fetches ran one after the other: {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn both_fetches_share_one_deadline() {
        let mut config = test_config();
        config.fetch.direct_timeout = Duration::from_secs(5);
        let ctx = test_context_with(
            config,
            FakeRetriever::uniform(DirectBehavior::Hang),
            models(embeddings(), FakeOcr::reading(&[])),
        );
        let budget = Duration::from_millis(150);

        let started = std::time::Instant::now();
        let outcome = match_faces(
            &ctx,
            &"https://hang.example/a.png".into(),
            &"https://hang.example/b.png".into(),
            ctx.deadline_after(budget),
        )
        .await;

        match outcome {
            Err(AnalysisError::Fetch(error)) => assert_eq!(error.cause(), FetchCause::Timeout),
            other => panic!("expected a fetch timeout, got {other:?}"),
        }
        assert!(started.elapsed() < budget * 2, "deadline applied per fetch: {:?}", started.elapsed());
    }
}
