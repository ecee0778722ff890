mod common;

use std::time::Duration;

use common::{FakeModels, Fixture};
use fracture_triage::error::FractureError;
use fracture_triage::fusion::Verdict;
use fracture_triage::mapping::BodyPart;
use fracture_triage::preprocess::ImageRef;
use fracture_triage::service::FractureService;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn analyze_many_keeps_input_order() {
    let fx = Fixture::new(FakeModels::hand(0.9));
    let images = vec![
        ImageRef::path(fx.image("one.png")),
        ImageRef::path(fx.dir.path().join("missing.png")),
        ImageRef::path(fx.image("three.png")),
    ];
    let Fixture { dir: _dir, cache, pipeline, .. } = fx;
    let service = FractureService::new(pipeline, 2);

    let results = service.analyze_many(images).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().verdict, Verdict::Detected);
    assert!(matches!(results[1], Err(FractureError::Decode { .. })));
    assert_eq!(results[2].as_ref().unwrap().part, BodyPart::Hand);
    // one.png and three.png have identical bytes
    assert_eq!(cache.len().unwrap(), 1);
    assert!(service.pipeline().registry().resident_count() <= 1);
}

#[tokio::test]
async fn part_then_fracture() {
    let fx = Fixture::new(FakeModels::hand(0.1));
    let image = ImageRef::path(fx.image("scan.png"));
    let Fixture { dir: _dir, pipeline, .. } = fx;
    let service = FractureService::new(pipeline, 1);

    let part = service.classify_part(image.clone()).await.unwrap();
    let result = service.classify_fracture(image, part).await.unwrap();
    assert_eq!(result.verdict, Verdict::Normal);
}

#[tokio::test]
async fn deadline_surfaces_as_timeout() {
    let mut models = FakeModels::hand(0.9);
    models.latency = Some(Duration::from_millis(40));
    let fx = Fixture::with_config(models, |c| c.deadline = Duration::from_millis(5));
    let image = ImageRef::path(fx.image("slow.png"));
    let Fixture { dir: _dir, cache, pipeline, .. } = fx;
    let service = FractureService::new(pipeline, 1);

    let err = service.analyze(image).await.unwrap_err();
    assert!(matches!(err, FractureError::Timeout(_)));
    assert!(cache.is_empty().unwrap());
}
