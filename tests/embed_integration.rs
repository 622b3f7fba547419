use eduindex::{Embedder, LocalEmbedder, vector::l2_distance};

#[test]
#[ignore = "downloads the embedding model"]
fn test_embedder_integration() {
    let embedder = LocalEmbedder::new_with_default_model().expect("Failed to create local embedding");
    let texts = vec!["for loops in python", "while loops in python", "photosynthesis in plants"];
    let embeddings = embedder.embed_batch(&texts).expect("Failed to embed batch");

    assert_eq!(embeddings.len(), 3);
    for embedding in &embeddings {
        assert_eq!(embedding.len(), embedder.dimension());
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    // related lessons sit closer together than unrelated ones
    let near = l2_distance(&embeddings[0], &embeddings[1]);
    let far = l2_distance(&embeddings[0], &embeddings[2]);
    assert!(near < far);
}
