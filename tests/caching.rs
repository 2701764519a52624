//! Integration tests for whole-template, sub-block and include caching

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use strata::{
    Cache, CachePlugin, Engine, FileCache, MemoryCache, MemoryLoader, RenderError, TemplateId,
    Variables,
};

fn engine(templates: &[(&str, &str)], cache: &Arc<MemoryCache>) -> Engine {
    let loader = MemoryLoader::new();
    for (path, source) in templates {
        loader.insert(*path, *source);
    }
    let mut engine = Engine::new().with_loader(loader);
    engine.add_plugin(&CachePlugin::new(cache.clone()).with_ttl(Duration::from_secs(60)));
    engine
}

fn render(engine: &Engine, name: &str) -> String {
    engine.render(name, Variables::new(), &[], true).unwrap()
}

fn counter(engine: &mut Engine) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    engine.add_fragment("count", move |_, _| {
        Ok(seen.fetch_add(1, Ordering::SeqCst).to_string())
    });
    count
}

#[test]
fn test_static_render_is_idempotent() {
    let cache = Arc::new(MemoryCache::new());
    let engine = engine(&[("page", "A{% begin x %}1{% end %}B")], &cache);

    let first = render(&engine, "page");
    let second = render(&engine, "page");
    assert_eq!(first, "A1B");
    assert_eq!(first, second);
    assert_eq!(cache.total_writes(), 1);
}

#[test]
fn test_cached_output_survives_source_change() {
    let cache = Arc::new(MemoryCache::new());
    let before = engine(&[("page", "old")], &cache);
    let after = engine(&[("page", "new")], &cache);

    assert_eq!(render(&before, "page"), "old");
    assert_eq!(render(&after, "page"), "old");
}

#[test]
fn test_sub_block_is_shared_through_cache() {
    let cache = Arc::new(MemoryCache::new());
    let page = |side: &str| {
        format!("{{% opt cachemode \"disabled\" %}}[{{% cache side %}}{side}{{% end %}}]")
    };
    let first = engine(&[("page", page("first").as_str())], &cache);
    let second = engine(&[("page", page("second").as_str())], &cache);

    assert_eq!(render(&first, "page"), "[first]");
    assert_eq!(render(&second, "page"), "[first]");
    // Only the block was stored; the page itself is uncacheable
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_sub_block_ttl() {
    let cache = Arc::new(MemoryCache::new());
    let page = |side: &str| {
        format!("{{% opt cachemode \"disabled\" %}}[{{% cache side 0 %}}{side}{{% end %}}]")
    };
    let first = engine(&[("page", page("first").as_str())], &cache);
    let second = engine(&[("page", page("second").as_str())], &cache);

    assert_eq!(render(&first, "page"), "[first]");
    // Expired immediately, so the block is recomputed
    assert_eq!(render(&second, "page"), "[second]");
}

#[test]
fn test_cacheable_block_needs_cache() {
    let loader = MemoryLoader::new().with_template("page", "{% cache side %}x{% end %}");
    let engine = Engine::new().with_loader(loader);
    assert!(matches!(
        engine.render("page", Variables::new(), &[], true),
        Err(RenderError::CacheUnavailable { .. })
    ));
}

#[test]
fn test_dynamic_page_resolves_fragments_each_time() {
    let cache = Arc::new(MemoryCache::new());
    let mut engine = engine(&[("page", "<p>{% defer count %}</p>")], &cache);
    let count = counter(&mut engine);

    assert_eq!(render(&engine, "page"), "<p>0</p>");
    assert_eq!(render(&engine, "page"), "<p>1</p>");
    assert_eq!(render(&engine, "page"), "<p>2</p>");
    assert_eq!(count.load(Ordering::SeqCst), 3);

    let id = TemplateId::derive("page".as_ref(), &Variables::new());
    assert_eq!(cache.writes(&id.compiled_key()), 1);
    assert_eq!(cache.writes(id.as_str()), 0);
}

#[test]
fn test_deferred_var_sees_request_bindings() {
    let cache = Arc::new(MemoryCache::new());
    let engine = engine(&[("page", "Hi {% defer var \"user\" %}")], &cache);

    let mut vars = Variables::new();
    vars.insert("user".into(), "ada".into());
    assert_eq!(engine.render("page", vars.clone(), &[], true).unwrap(), "Hi ada");
    assert_eq!(engine.render("page", vars, &[], true).unwrap(), "Hi ada");
}

#[test]
fn test_unknown_fragment_rejected_at_compile_time() {
    let cache = Arc::new(MemoryCache::new());
    let engine = engine(&[("page", "{% defer launch %}")], &cache);
    assert!(matches!(
        engine.render("page", Variables::new(), &[], true),
        Err(RenderError::Fragment(_))
    ));
    assert!(cache.is_empty());
}

#[test]
fn test_cached_include_memoizes() {
    let cache = Arc::new(MemoryCache::new());
    let page = "{% opt cachemode \"disabled\" %}<{% cinclude \"widget\" %}>";
    let first = engine(&[("page", page), ("widget", "w1")], &cache);
    let second = engine(&[("page", page), ("widget", "w2")], &cache);

    assert_eq!(render(&first, "page"), "<w1>");
    assert_eq!(render(&second, "page"), "<w1>");
}

#[test]
fn test_cached_include_with_fragments_makes_includer_dynamic() {
    let cache = Arc::new(MemoryCache::new());
    let mut engine = engine(
        &[
            ("warm", "{% cinclude \"widget\" %}"),
            ("page", "[{% cinclude \"widget\" %}]"),
            ("widget", "w{% defer count %}"),
        ],
        &cache,
    );
    let count = counter(&mut engine);

    // Stores the widget output with its tag unresolved
    assert_eq!(render(&engine, "warm"), "w0");

    // A cache hit still carries the tag, so the page must not be stored resolved
    assert_eq!(render(&engine, "page"), "[w1]");
    assert_eq!(render(&engine, "page"), "[w2]");
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn test_included_template_renders_fresh_at_top_level() {
    let cache = Arc::new(MemoryCache::new());
    let mut engine = engine(
        &[("page", "[{% cinclude \"widget\" %}]"), ("widget", "w{% defer count %}")],
        &cache,
    );
    counter(&mut engine);

    assert_eq!(render(&engine, "page"), "[w0]");
    // The include entry holds an unresolved tag and must not be served as the widget's output
    assert_eq!(render(&engine, "widget"), "w1");
    assert_eq!(render(&engine, "widget"), "w2");
}

#[test]
fn test_parent_in_cacheable_override_keeps_override() {
    let cache = Arc::new(MemoryCache::new());
    let engine = engine(
        &[
            ("base", "<{% cache side %}base{% end %}>"),
            ("child", "{% extend \"base\" %}{% cache side %}({% parent %}){% end %}"),
        ],
        &cache,
    );
    assert_eq!(render(&engine, "child"), "<(base)>");
    assert_eq!(render(&engine, "child"), "<(base)>");
}

#[test]
fn test_interpolated_tag_is_inert() {
    let cache = Arc::new(MemoryCache::new());
    let mut engine = engine(&[("page", "comment: {{ comment }}")], &cache);
    let count = counter(&mut engine);
    let tag = strata::deferred::compile(&strata::FragmentCall {
        op: "count".into(),
        args: vec![],
    })
    .unwrap();

    for text in [tag.as_str(), "use {%! to open"] {
        let mut vars = Variables::new();
        vars.insert("comment".into(), text.into());
        assert_eq!(
            engine.render("page", vars, &[], true).unwrap(),
            format!("comment: {text}")
        );
    }
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cached_include_skips_uncacheable_child() {
    let cache = Arc::new(MemoryCache::new());
    let page = "<{% cinclude \"widget\" %}>";
    let first = engine(&[("page", page), ("widget", "{% opt cachemode \"disabled\" %}w1")], &cache);
    let second = engine(&[("page", page), ("widget", "{% opt cachemode \"disabled\" %}w2")], &cache);

    assert_eq!(render(&first, "page"), "<w1>");
    assert_eq!(render(&second, "page"), "<w2>");
    assert!(cache.is_empty());
}

#[test]
fn test_file_cache_recovers_from_corruption() {
    let dir = tempfile::TempDir::new().unwrap();
    let cache = Arc::new(FileCache::new(dir.path()).unwrap());
    let loader = MemoryLoader::new().with_template("page", "content");
    let mut engine = Engine::new().with_loader(loader);
    engine.set_cache(cache.clone(), Duration::from_secs(60));

    assert_eq!(render(&engine, "page"), "content");

    let id = TemplateId::derive("page".as_ref(), &Variables::new());
    let entry = cache.entry_path(id.as_str());
    let mut bytes = std::fs::read(&entry).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    std::fs::write(&entry, bytes).unwrap();
    assert!(cache.get(id.as_str()).is_err());

    // The corrupt entry is discarded and rewritten
    assert_eq!(render(&engine, "page"), "content");
    assert_eq!(cache.get(id.as_str()).unwrap(), "content");
}

#[test]
fn test_file_cache_expiry() {
    let dir = tempfile::TempDir::new().unwrap();
    let cache = Arc::new(FileCache::new(dir.path()).unwrap());

    let old = Engine::new().with_loader(MemoryLoader::new().with_template("page", "old"));
    let new = Engine::new().with_loader(MemoryLoader::new().with_template("page", "new"));
    let mut engines = [old, new];
    for engine in &mut engines {
        engine.set_cache(cache.clone(), Duration::ZERO);
    }

    assert_eq!(render(&engines[0], "page"), "old");
    assert_eq!(render(&engines[1], "page"), "new");
}
