use context_indexer::{AnalysisService, AnalysisStatus, IndexEvent, IndexerConfig, IndexerError};
use context_syntax::{
    BuiltinGrammar, Grammar, GrammarRegistry, LanguageId, Symbol, SymbolKind, SyntaxTree,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const HELLO_PY: &str = r#"
def hello_world():
    print("hello")

class TestClass:
    def __init__(self):
        self.value = 1
"#;

fn service() -> AnalysisService {
    AnalysisService::with_builtins(IndexerConfig::default()).expect("service")
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(&path, content).expect("write file");
    path
}

fn outline(symbols: &[Symbol]) -> Vec<(SymbolKind, &str, Option<&str>)> {
    symbols
        .iter()
        .map(|s| {
            let parent = s.parent.map(|idx| symbols[idx].name.as_str());
            (s.kind, s.name.as_str(), parent)
        })
        .collect()
}

/// Python grammar that counts invocations and parses slowly
struct CountingPython {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl Grammar for CountingPython {
    fn language(&self) -> LanguageId {
        LanguageId::Python
    }

    fn parse<'src>(&self, source: &'src str) -> context_syntax::Result<SyntaxTree<'src>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        BuiltinGrammar::Python.parse(source)
    }

    fn extract_symbols(&self, tree: &SyntaxTree<'_>) -> context_syntax::Result<Vec<Symbol>> {
        BuiltinGrammar::Python.extract_symbols(tree)
    }
}

fn counting_service(delay: Duration) -> (AnalysisService, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = GrammarRegistry::with_builtins();
    registry.register(
        LanguageId::Python,
        Arc::new(CountingPython {
            calls: Arc::clone(&calls),
            delay,
        }),
    );
    let service =
        AnalysisService::new(IndexerConfig::default(), Arc::new(registry)).expect("service");
    (service, calls)
}

#[tokio::test]
async fn python_scenario_yields_ordered_symbols() {
    let temp = TempDir::new().expect("tempdir");
    let path = write(&temp, "hello.py", HELLO_PY);

    let result = service().analyze(&path).await.expect("analyze");

    assert_eq!(result.status, AnalysisStatus::Parsed);
    assert_eq!(result.language, LanguageId::Python);
    assert!(result.errors.is_empty());
    assert_eq!(
        outline(&result.symbols),
        vec![
            (SymbolKind::Function, "hello_world", None),
            (SymbolKind::Class, "TestClass", None),
            (SymbolKind::Function, "__init__", Some("TestClass")),
        ]
    );

    let summary = result.summary();
    assert_eq!(summary.functions.len(), 2);
    assert_eq!(summary.classes.len(), 1);
}

#[tokio::test]
async fn unknown_extension_is_unsupported_not_an_error() {
    let temp = TempDir::new().expect("tempdir");
    let path = write(&temp, "unknown.xyz", "whatever this is\n");

    let result = service().analyze(&path).await.expect("analyze");

    assert_eq!(result.status, AnalysisStatus::Unsupported);
    assert_eq!(result.language, LanguageId::Unknown);
    assert!(result.symbols.is_empty());
}

#[tokio::test]
async fn shebang_script_without_extension_is_parsed() {
    let temp = TempDir::new().expect("tempdir");
    let path = write(&temp, "manage", "#!/usr/bin/env python3\ndef main():\n    pass\n");

    let result = service().analyze(&path).await.expect("analyze");

    assert_eq!(result.language, LanguageId::Python);
    assert_eq!(result.symbols[0].name, "main");
}

#[tokio::test]
async fn missing_file_is_not_found_and_drops_cache_entry() {
    let temp = TempDir::new().expect("tempdir");
    let path = write(&temp, "gone.py", "def f():\n    pass\n");
    let service = service();
    let mut events = service.subscribe();

    service.analyze(&path).await.expect("first analyze");
    assert_eq!(service.store().len(), 1);

    std::fs::remove_file(&path).expect("remove");
    let err = service.analyze(&path).await.unwrap_err();

    assert!(matches!(err, IndexerError::NotFound(_)), "got {err:?}");
    assert!(service.store().is_empty());
    let expected = temp.path().canonicalize().unwrap().join("gone.py");
    assert_eq!(
        events.try_recv().expect("removal event"),
        IndexEvent::Removed { path: expected }
    );
}

#[tokio::test]
async fn nonexistent_path_is_not_found() {
    let err = service()
        .analyze("/definitely/not/here.py")
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::NotFound(_)));
}

#[tokio::test]
async fn repeated_analysis_is_identical_and_cached() {
    let temp = TempDir::new().expect("tempdir");
    let path = write(&temp, "app.ts", "export class App {\n  run(): void {}\n}\n");
    let service = service();

    let first = service.analyze(&path).await.expect("first");
    let second = service.analyze(&path).await.expect("second");

    assert_eq!(*first, *second);
    assert!(Arc::ptr_eq(&first, &second));
    let stats = service.stats();
    assert_eq!(stats.parses, 1);
    assert_eq!(stats.store.hits, 1);
    assert_eq!(stats.store.misses, 1);
}

#[tokio::test]
async fn modified_file_is_reparsed() {
    let temp = TempDir::new().expect("tempdir");
    let path = write(&temp, "lib.js", "function before() {}\n");
    let service = service();

    let first = service.analyze(&path).await.expect("first");
    std::fs::write(&path, "function after() {}\nfunction more() {}\n").expect("rewrite");
    let second = service.analyze(&path).await.expect("second");

    assert_ne!(first.fingerprint, second.fingerprint);
    let names: Vec<_> = second.symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["after", "more"]);
    let stats = service.stats();
    assert_eq!(stats.parses, 2);
    assert_eq!(stats.store.misses, 1);
    assert_eq!(stats.store.stale_misses, 1);
}

#[tokio::test]
async fn equivalent_paths_share_an_entry() {
    let temp = TempDir::new().expect("tempdir");
    let path = write(&temp, "pkg/mod.py", "class A:\n    pass\n");
    let service = service();

    let direct = service.analyze(&path).await.expect("direct");
    let dotted = temp.path().join("pkg").join("..").join("pkg").join("mod.py");
    let via_dots = service.analyze(&dotted).await.expect("dotted");

    assert!(Arc::ptr_eq(&direct, &via_dots));
    assert_eq!(service.store().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_share_one_parse() {
    let temp = TempDir::new().expect("tempdir");
    let path = write(&temp, "busy.py", HELLO_PY);
    let (service, calls) = counting_service(Duration::from_millis(100));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            let path = path.clone();
            tokio::spawn(async move { service.analyze(&path).await })
        })
        .collect();

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.expect("join").expect("analyze"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.stats().parses, 1);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    assert_eq!(service.stats().in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_keeps_order_and_survives_failures() {
    let temp = TempDir::new().expect("tempdir");
    let good = write(&temp, "good.py", "def ok():\n    pass\n");
    let data = write(&temp, "data.yaml", "key: value\n");
    let missing = temp.path().join("missing.js");
    let odd = write(&temp, "notes.xyz", "plain text\n");

    let outcomes = service()
        .analyze_many(vec![good.clone(), missing.clone(), data.clone(), odd.clone()])
        .await;

    let paths: Vec<_> = outcomes.iter().map(|o| o.path.clone()).collect();
    assert_eq!(paths, vec![good, missing, data, odd]);
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(outcomes[1].result, Err(IndexerError::NotFound(_))));
    let yaml = outcomes[2].result.as_ref().expect("yaml");
    assert_eq!(yaml.language, LanguageId::Yaml);
    assert!(yaml.symbols.is_empty());
    let odd = outcomes[3].result.as_ref().expect("unsupported");
    assert_eq!(odd.status, AnalysisStatus::Unsupported);
}

#[tokio::test]
async fn partial_parse_keeps_good_declarations() {
    let temp = TempDir::new().expect("tempdir");
    let path = write(
        &temp,
        "partial.py",
        "def good():\n    return 1\n\ndef bad():\n    x = = 2\n\nclass Fine:\n    pass\n",
    );

    let result = service().analyze(&path).await.expect("analyze");

    assert!(!result.errors.is_empty());
    let names: Vec<_> = result.symbols.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"good"), "got {names:?}");
    assert!(names.contains(&"Fine"), "got {names:?}");
}

#[tokio::test]
async fn latin1_source_reports_the_undecodable_byte() {
    let temp = TempDir::new().expect("tempdir");
    let path = temp.path().join("legacy.py");
    std::fs::write(&path, b"# caf\xe9\ndef ok():\n    pass\n").expect("write file");

    let result = service().analyze(&path).await.expect("analyze");

    let names: Vec<_> = result.symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["ok"]);
    assert_eq!(result.symbols[0].start.line, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!((result.errors[0].start.line, result.errors[0].start.column), (1, 5));
}

#[tokio::test]
async fn oversized_file_is_rejected_before_parsing() {
    let temp = TempDir::new().expect("tempdir");
    let path = write(&temp, "huge.json", &" ".repeat(4096));
    let config = IndexerConfig {
        max_source_bytes: 1024,
        ..IndexerConfig::default()
    };
    let service = AnalysisService::with_builtins(config).expect("service");

    let err = service.analyze(&path).await.unwrap_err();

    assert!(matches!(err, IndexerError::TooLarge { limit: 1024, .. }), "got {err:?}");
    assert_eq!(service.stats().parses, 0);
}

#[tokio::test]
async fn eviction_is_broadcast() {
    let temp = TempDir::new().expect("tempdir");
    let config = IndexerConfig {
        max_entries: 1,
        ..IndexerConfig::default()
    };
    let service = AnalysisService::with_builtins(config).expect("service");
    let mut events = service.subscribe();
    let first = write(&temp, "a.py", "def a():\n    pass\n");
    let second = write(&temp, "b.py", "def b():\n    pass\n");

    service.analyze(&first).await.expect("a");
    service.analyze(&second).await.expect("b");

    assert_eq!(
        events.try_recv().expect("eviction"),
        IndexEvent::Evicted {
            path: first.canonicalize().unwrap()
        }
    );
    assert_eq!(service.stats().store.evictions, 1);
}

#[tokio::test]
async fn warm_indexes_supported_files() {
    let temp = TempDir::new().expect("tempdir");
    write(&temp, "src/app.py", HELLO_PY);
    write(&temp, "src/util.js", "export function util() {}\n");
    write(&temp, "config/settings.yml", "debug: true\n");
    write(&temp, "README.md", "# readme\n");
    write(&temp, "node_modules/dep/index.js", "module.exports = {};\n");
    let service = service();

    let stats = service
        .warm(&[temp.path().to_path_buf()])
        .await
        .expect("warm");

    assert_eq!(stats.files, 3);
    assert_eq!(stats.parsed, 3);
    assert!(stats.errors.is_empty());
    assert_eq!(stats.languages.get("python"), Some(&1));
    assert_eq!(service.store().len(), 3);

    let cached = service
        .analyze(temp.path().join("src/app.py"))
        .await
        .expect("cached");
    assert_eq!(cached.symbols.len(), 3);
    assert_eq!(service.stats().parses, 3);
}

#[test]
fn invalid_config_is_rejected() {
    let config = IndexerConfig {
        read_timeout_ms: 0,
        ..IndexerConfig::default()
    };
    let err = AnalysisService::with_builtins(config).unwrap_err();
    assert!(matches!(err, IndexerError::InvalidConfig(_)));
}
