mod common;

use std::sync::Arc;

use common::test_utils::{MockFetcher, png_bytes};
use futures::{FutureExt, executor::block_on};
use gltf_pbr_viewer::{
    data_structures::document::ImageSlot,
    error::ViewerError,
    resources::{ModelLoader, fetch::is_remote, resolve_path},
};

const TWO_BUFFERS_THREE_IMAGES: &str = r#"{
    "asset": { "version": "2.0" },
    "buffers": [
        { "uri": "a.bin", "byteLength": 4 },
        { "uri": "buffers/b.bin", "byteLength": 4 }
    ],
    "images": [
        { "uri": "one.png" },
        { "uri": "two.png" },
        { "uri": "https://example.com/three.png" }
    ]
}"#;

fn fetcher_with_buffers() -> MockFetcher {
    MockFetcher::new()
        .with_file("models/scene.gltf", TWO_BUFFERS_THREE_IMAGES)
        .with_file("models/a.bin", vec![1, 2, 3, 4])
        .with_file("models/buffers/b.bin", vec![5, 6, 7, 8])
}

#[test]
fn should_return_without_waiting_for_images() {
    let fetcher = Arc::new(
        fetcher_with_buffers()
            .with_pending("models/one.png")
            .with_pending("models/two.png")
            .with_pending("https://example.com/three.png"),
    );
    let loader = ModelLoader::new(fetcher.clone());

    let loaded = block_on(loader.load("models/scene.gltf", false)).unwrap();

    assert!(loaded.pending_images.is_some());
    assert_eq!(loaded.document.buffers, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
    assert_eq!(loaded.document.images.len(), 3);
    assert!(!loaded.document.images.all_settled());
    let requested = fetcher.requested();
    assert!(requested.contains(&"models/a.bin".to_string()));
    assert!(requested.contains(&"models/buffers/b.bin".to_string()));
    assert_eq!(requested.iter().filter(|url| url.ends_with(".png")).count(), 3);
}

#[test]
fn should_fetch_images_while_buffers_are_in_flight() {
    for wait_for_textures in [true, false] {
        let fetcher = Arc::new(
            MockFetcher::new()
                .with_file("models/scene.gltf", TWO_BUFFERS_THREE_IMAGES)
                .with_pending("models/a.bin")
                .with_file("models/buffers/b.bin", vec![5, 6, 7, 8])
                .with_file("models/one.png", png_bytes(1, 1, [255, 0, 0, 255]))
                .with_file("models/two.png", png_bytes(1, 1, [0, 255, 0, 255]))
                .with_file("https://example.com/three.png", png_bytes(1, 1, [0, 0, 255, 255])),
        );
        let loader = ModelLoader::new(fetcher.clone());

        let mut load = Box::pin(loader.load("models/scene.gltf", wait_for_textures));
        assert!((&mut load).now_or_never().is_none());

        let requested = fetcher.requested();
        assert!(requested.contains(&"models/a.bin".to_string()));
        for image in ["models/one.png", "models/two.png", "https://example.com/three.png"] {
            assert!(requested.contains(&image.to_string()), "{} not requested", image);
        }
    }
}

#[test]
fn should_keep_images_that_finished_before_the_buffers() {
    let fetcher = Arc::new(
        fetcher_with_buffers()
            .with_file("models/one.png", png_bytes(1, 1, [255, 0, 0, 255]))
            .with_file("models/two.png", png_bytes(1, 1, [0, 255, 0, 255]))
            .with_file("https://example.com/three.png", png_bytes(1, 1, [0, 0, 255, 255])),
    );
    let loader = ModelLoader::new(fetcher);

    let loaded = block_on(loader.load("models/scene.gltf", true)).unwrap();

    assert!(loaded.document.images.all_settled());
    assert_eq!(loaded.document.images.failed_count(), 0);
}

#[test]
fn should_settle_every_image_once_pending_images_run() {
    let fetcher = Arc::new(
        fetcher_with_buffers()
            .with_file("models/one.png", png_bytes(2, 2, [255, 0, 0, 255]))
            .with_file("models/two.png", png_bytes(1, 1, [0, 255, 0, 255]))
            .with_file("https://example.com/three.png", png_bytes(4, 2, [0, 0, 255, 255])),
    );
    let loader = ModelLoader::new(fetcher);

    let loaded = block_on(loader.load("models/scene.gltf", false)).unwrap();
    let images = loaded.document.images.clone();

    block_on(loaded.pending_images.expect("image loading deferred"));

    assert!(images.all_settled());
    match images.get(2) {
        Some(ImageSlot::Ready(image)) => {
            assert_eq!(image.dimensions(), (4, 2));
            assert_eq!(image.get_pixel(0, 0).0, [0, 0, 255, 255]);
        }
        other => panic!("expected a decoded image, got {:?}", other),
    }
}

#[test]
fn should_tolerate_failed_images_when_waiting() {
    let fetcher = Arc::new(
        fetcher_with_buffers()
            .with_file("models/one.png", png_bytes(1, 1, [255, 255, 255, 255]))
            .with_file("models/two.png", b"not an image".to_vec())
            .with_file("https://example.com/three.png", png_bytes(1, 1, [0, 0, 0, 255])),
    );
    let loader = ModelLoader::new(fetcher);

    let loaded = block_on(loader.load("models/scene.gltf", true)).unwrap();

    assert!(loaded.pending_images.is_none());
    assert!(loaded.document.images.all_settled());
    assert_eq!(loaded.document.images.failed_count(), 1);
    assert!(matches!(loaded.document.images.get(1), Some(ImageSlot::Failed(_))));
    assert!(matches!(loaded.document.images.get(0), Some(ImageSlot::Ready(_))));
}

#[test]
fn should_fail_when_a_buffer_cannot_be_fetched() {
    let fetcher = Arc::new(
        MockFetcher::new()
            .with_file("models/scene.gltf", TWO_BUFFERS_THREE_IMAGES)
            .with_file("models/a.bin", vec![1, 2, 3, 4]),
    );
    let loader = ModelLoader::new(fetcher);

    let error = match block_on(loader.load("models/scene.gltf", false)) {
        Ok(_) => panic!("load succeeded without buffer b"),
        Err(error) => error,
    };

    match error.downcast_ref::<ViewerError>() {
        Some(ViewerError::FetchFailure { url, .. }) => assert_eq!(url, "models/buffers/b.bin"),
        other => panic!("expected FetchFailure, got {:?}", other),
    }
}

#[test]
fn should_fail_when_a_buffer_is_short() {
    let fetcher = Arc::new(
        fetcher_with_buffers().with_file("models/buffers/b.bin", vec![5, 6]),
    );
    let loader = ModelLoader::new(fetcher);

    let error = block_on(loader.load("models/scene.gltf", false))
        .err()
        .expect("short buffer must fail the load");

    assert!(matches!(
        error.downcast_ref::<ViewerError>(),
        Some(ViewerError::InvalidDocument(_))
    ));
}

#[test]
fn should_reject_embedded_data_uris() {
    let json = r#"{
        "asset": { "version": "2.0" },
        "buffers": [{ "uri": "data:application/octet-stream;base64,AAAAAA==", "byteLength": 4 }]
    }"#;
    let loader = ModelLoader::new(Arc::new(MockFetcher::new().with_file("inline.gltf", json)));

    let error = block_on(loader.load("inline.gltf", true))
        .err()
        .expect("data URIs are not fetched");

    assert!(matches!(
        error.downcast_ref::<ViewerError>(),
        Some(ViewerError::Unsupported { what: "buffer URI", .. })
    ));
}

#[test]
fn should_fail_on_accessor_counts_too_large_to_address() {
    let json = r#"{
        "asset": { "version": "2.0" },
        "buffers": [{ "uri": "a.bin", "byteLength": 12 }],
        "bufferViews": [{ "buffer": 0, "byteLength": 12 }],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 2305843009213693951, "type": "VEC3" }
        ]
    }"#;
    let loader = ModelLoader::new(Arc::new(
        MockFetcher::new()
            .with_file("huge.gltf", json)
            .with_file("a.bin", vec![0; 12]),
    ));

    let error = block_on(loader.load("huge.gltf", true))
        .err()
        .expect("the accessor cannot fit its view");

    assert!(matches!(
        error.downcast_ref::<ViewerError>(),
        Some(ViewerError::AccessorOverrun { available: 12, .. })
    ));
}

#[test]
fn should_reject_documents_that_are_not_gltf() {
    let loader = ModelLoader::new(Arc::new(
        MockFetcher::new().with_file("broken.gltf", "{ \"asset\": "),
    ));

    let error = block_on(loader.load("broken.gltf", true))
        .err()
        .expect("truncated JSON");

    assert!(matches!(
        error.downcast_ref::<ViewerError>(),
        Some(ViewerError::InvalidDocument(_))
    ));
}

#[test]
fn should_fail_when_the_document_is_missing() {
    let loader = ModelLoader::new(Arc::new(MockFetcher::new()));

    let error = block_on(loader.load("missing.gltf", true))
        .err()
        .expect("nothing to fetch");

    assert!(matches!(
        error.downcast_ref::<ViewerError>(),
        Some(ViewerError::FetchFailure { .. })
    ));
}

#[test]
fn should_resolve_paths_against_the_document_directory() {
    assert_eq!(resolve_path("models/helmet/scene.gltf", "scene.bin"), "models/helmet/scene.bin");
    assert_eq!(
        resolve_path("https://host/a/b/scene.gltf", "textures/c.png"),
        "https://host/a/b/textures/c.png"
    );
    assert_eq!(resolve_path("scene.gltf", "scene.bin"), "scene.bin");
    assert_eq!(
        resolve_path("models/scene.gltf", "http://cdn/x.png"),
        "http://cdn/x.png"
    );
    assert!(is_remote("https://example.com"));
    assert!(!is_remote("images/brdf.png"));
}
