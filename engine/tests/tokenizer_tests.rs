use engine::config::BuildConfig;
use engine::tokenizer::{main_text, tokenize, Tokenizer};
use scraper::Html;

#[test]
fn it_normalizes_and_stems() {
    let toks = tokenize("Running Runners RUN! The café's menu.");
    let words: Vec<String> = toks.into_iter().map(|(w, _)| w).collect();
    // Stemming to "run" should appear
    assert!(words.contains(&"run".to_string()));
    // Unicode normalization keeps the accented letter inside the token
    assert!(words.contains(&"café".to_string()));
}

#[test]
fn it_filters_stopwords() {
    let toks = tokenize("The quick brown fox and the lazy dog");
    let words: Vec<String> = toks.into_iter().map(|(w, _)| w).collect();
    assert!(!words.contains(&"the".to_string()));
    assert!(!words.contains(&"and".to_string()));
}

#[test]
fn positions_index_the_main_text_stream() {
    let html = "<html><head><title>Rust</title></head><body><h1>Rust guide</h1><p>learn rust</p></body></html>";
    let doc = Html::parse_document(html);
    let text = main_text(&doc);
    let terms = Tokenizer::new(&BuildConfig::default()).weigh(&doc, &text);
    assert_eq!(terms["rust"].positions, vec![0, 1, 4]);
    assert_eq!(terms["guid"].positions, vec![2]);
    for hits in terms.values() {
        assert!(hits.positions.windows(2).all(|w| w[0] < w[1]));
    }
}
