use std::cell::{Cell, RefCell};
use std::rc::Rc;

use runtime::{Engine, EngineConfig, FileReader, MemoryReader, RenderError, Rendered, RuntimeValue, Template};
use serde_json::json;

fn render(source: &str, params: serde_json::Value) -> Rendered {
    Engine::new().render_source_blocking(source, params.into())
}

fn run(source: &str, params: serde_json::Value) -> String {
    let rendered = render(source, params);
    assert!(rendered.error.is_none(), "render failed: {:?}", rendered.error);
    rendered.content
}

fn engine_with(reader: &MemoryReader) -> Engine {
    Engine::builder().reader(reader.clone()).build()
}

fn load(engine: &Engine, identity: &str) -> Rc<Template> {
    let slot = Rc::new(RefCell::new(None));
    let sink = slot.clone();
    engine.load(identity, move |_, loaded| *sink.borrow_mut() = loaded.ok());
    engine.run_until_idle();
    let template = slot.borrow_mut().take();
    template.expect("template loads")
}

#[test]
fn expressions_and_text() {
    assert_eq!(run("abc#{number}", json!({"number": 4})), "abc4\n");
    assert_eq!(run("hello\n\n  world\n", json!({})), "hello\n\n  world\n");
    assert_eq!(run("#{ !'<t>'}", json!({})), "false\n");
}

#[test]
fn sync_render() {
    let engine = Engine::new();
    let rendered = engine.run_source_sync("abc#{number}", json!({"number": 4}).into());
    assert_eq!(rendered.into_result().unwrap(), "abc4\n");
}

#[test]
fn escaped_markers() {
    assert_eq!(run("\\--abc\\#{'1'}", json!({})), "--abc#{'1'}\n");
    assert_eq!(run("\\\\--abc\\\\#{'1'}", json!({})), "\\--abc\\#{'1'}\n");
    assert_eq!(run("\\\\--@(cache: 1)", json!({})), "\\--@(cache: 1)\n");
}

#[test]
fn escape_shortcut() {
    assert_eq!(run("abc#{!param.xml}", json!({"xml": "<t>"})), "abc&lt;t&gt;\n");
    assert_eq!(run("abc#{param.xml}", json!({"xml": "<t>"})), "abc<t>\n");
    assert_eq!(run("#{escape('a&b')}", json!({})), "a&amp;b\n");
}

#[test]
fn custom_escaper() {
    let engine = Engine::builder().escaper(|s| s.replace('<', "[")).build();
    let rendered = engine.render_source_blocking("#{!'<b>'}", RuntimeValue::Null);
    assert_eq!(rendered.content, "[b>\n");
}

#[test]
fn directives_and_relative_links() {
    assert_eq!(run("--@(cache)\nabc#{param.number}", json!({"number": 4})), "abc4\n");
    assert_eq!(run("--@(cache:)\n'../#{param.number}'", json!({"number": 4})), "'../4'\n");
    assert_eq!(
        run("--@(cache: 1)\n'../\\\\#{param.number}'", json!({"number": 4})),
        "'../\\#{param.number}'\n"
    );
}

#[test]
fn invalid_directive_fails_the_render() {
    let rendered = render("--@(cache 1)\n'../\\\\#{param.number}'", json!({"number": 4}));
    assert!(matches!(rendered.error, Some(RenderError::Compile(_))));
    assert_eq!(rendered.content, "");
}

#[test]
fn code_lines_and_blocks() {
    let source = "--items = ['a', 'b']\n\
                  --for i, item in items\n\
                  #{i}:#{item}\n\
                  --end\n\
                  --\n\
                  total = 0\n\
                  for n in 4\n\
                    total = total + n\n\
                  end\n\
                  --\n\
                  total #{total}";
    assert_eq!(run(source, json!({})), "0:a\n1:b\ntotal 6\n");
}

#[test]
fn runtime_errors_carry_the_template_line() {
    let rendered = render("a\n--x = missing\nb", json!({}));
    match rendered.error {
        Some(RenderError::Runtime(error)) => assert_eq!(error.line, Some(2)),
        other => panic!("expected a runtime error, got {:?}", other),
    }
    assert_eq!(rendered.content, "");
}

#[test]
fn indent_dialect() {
    assert_eq!(
        run("--@(indent)\n--if true\n  yes\n    #{'a'}", json!({})),
        "  yes\n    a\n"
    );
    assert_eq!(
        run("--@(indent)\n--if true\n  yes\n  --this.print('b')", json!({})),
        "  yes\nb"
    );
    let source = "--@(indent)\n\
                  head\n\
                  --if true\n  yes#{'a'}\n  --for c in coordinates\n    #{c.x}\n  done";
    let params = json!({"coordinates": [{"x": 1, "y": 1}, {"x": 2, "y": 2}, {"x": 3, "y": 3}]});
    assert_eq!(run(source, params), "head\n  yesa\n    1\n    2\n    3\n  done\n");
}

#[test]
fn filters() {
    assert_eq!(run("--this.filter(upper, fn()\nabc\n--end)\nx", json!({})), "ABC\nx\n");
    assert_eq!(
        run("--this.beginFilter(fn(s) s + '---' end)\nabc\n--this.end()\nxyz", json!({})),
        "abc\n---xyz\n"
    );
}

#[test]
fn named_blocks_and_find() {
    let source = "--this.block('row')\n\
                  o o o\n\
                  --this.end()\n\
                  --found = this.find('row')\n\
                  #{found.name()}";
    assert_eq!(run(source, json!({})), "o o o\nrow\n");

    let rendered = render("--this.block('')", json!({}));
    assert!(rendered.error.is_some());
}

#[test]
fn extend_and_insert_super() {
    let reader = MemoryReader::new()
        .with(
            "base.tpl",
            "<html>\n\
             --this.block('title')\n\
             Base title\n\
             --this.end()\n\
             --this.block('body', fn()\n\
             X\n\
             --end)\n\
             </html>",
        )
        .with(
            "derived.tpl",
            "ignored\n\
             --this.extend('base.tpl', fn(err)\n\
             --this.extendBlock('body')\n\
             Y\n\
             --this.end()\n\
             --end)",
        )
        .with(
            "grand.tpl",
            "--this.extend('derived.tpl', fn(err)\n\
             --this.extendBlock('body')\n\
             Z\n\
             --this.end()\n\
             --this.block('title')\n\
             Grand title\n\
             --this.end()\n\
             --end)",
        );
    let engine = engine_with(&reader);

    let derived = engine.render_blocking("derived.tpl", json!({}).into());
    assert_eq!(derived.into_result().unwrap(), "<html>\nBase title\nX\nY\n</html>\n");

    let grand = engine.render_blocking("grand.tpl", json!({}).into());
    assert_eq!(grand.into_result().unwrap(), "<html>\nGrand title\nX\nY\nZ\n</html>\n");
}

#[test]
fn extending_twice_is_a_usage_error() {
    let reader = MemoryReader::new()
        .with("base.tpl", "b")
        .with("twice.tpl", "--this.extend('base.tpl', fn(e) end)\n--this.extend('base.tpl', fn(e) end)");
    let engine = engine_with(&reader);
    let rendered = engine.render_blocking("twice.tpl", RuntimeValue::Null);
    assert!(rendered.error.unwrap().to_string().contains("Can not extend twice"));
}

#[test]
fn embeds_keep_source_order() {
    let reader = MemoryReader::new()
        .with(
            "part.tpl",
            "--this.async(defer, param.delay, fn(err)\n\
             part #{param.n}\n\
             --end)",
        )
        .with(
            "page.tpl",
            "start\n\
             --this.embed('part.tpl', {n: 1, delay: 5})\n\
             --this.embed('part.tpl', {n: 2, delay: 0})\n\
             end",
        );
    let engine = engine_with(&reader);
    let rendered = engine.render_blocking("page.tpl", RuntimeValue::Null);
    assert_eq!(rendered.into_result().unwrap(), "start\npart 1\npart 2\nend\n");
    // Both embeds waited on a single read.
    assert_eq!(reader.reads(), 2);
}

#[test]
fn embed_indent_and_forwarded_params() {
    let reader = MemoryReader::new()
        .with("item.tpl", "a #{param.req}\nb #{param.extra}")
        .with("list.tpl", "--this.embed('item.tpl', {extra: 'x'}, '  ')\n--this.embed('item.tpl', {extra: 'y'}, 1)");
    let engine = engine_with(&reader);
    let rendered = engine.render_blocking("list.tpl", json!({"req": "r", "other": "o"}).into());
    assert_eq!(rendered.into_result().unwrap(), "  a r\n  b x\n a r\n b y\n");
}

#[test]
fn embed_errors_are_aggregated() {
    let reader = MemoryReader::new().with(
        "errors.tpl",
        "--this.embed('nofile1.tpl', fn(err)\n\
         error is : #{err}\n\
         --end)\n\
         --this.embed('nofile2.tpl')",
    );
    let engine = engine_with(&reader);
    let rendered = engine.render_blocking("errors.tpl", RuntimeValue::Null);
    let error = rendered.error.expect("embed errors");
    assert_eq!(error.len(), 2);
    assert!(rendered.content.contains("error is : "));
    assert!(rendered.content.contains("nofile1"));
}

#[test]
fn abort_inside_async_stops_the_render() {
    let source = "before\n\
                  --this.async(defer, 1, fn(err)\n\
                  inside\n\
                  --this.abort()\n\
                  after abort\n\
                  --end)\n\
                  tail";
    let rendered = render(source, json!({}));
    assert!(rendered.aborted);
    assert!(rendered.error.is_none());
    assert!(rendered.content.starts_with("before\n"));
    assert!(!rendered.content.contains("after abort"));
}

#[test]
fn abort_in_sync_render_keeps_earlier_output() {
    let rendered = Engine::new().run_source_sync("a\n--this.abort()\nb", RuntimeValue::Null);
    assert!(rendered.aborted);
    assert!(rendered.error.is_none());
    assert_eq!(rendered.content, "a\n");
}

#[test]
fn sync_render_rejects_async_calls() {
    let rendered = Engine::new().run_source_sync("--this.async(defer, 0, fn(err) end)", RuntimeValue::Null);
    assert!(matches!(rendered.error, Some(RenderError::Usage(_))));
}

#[test]
fn async_without_callback_is_a_usage_error() {
    let rendered = render("--this.async(defer, 0)", json!({}));
    let message = rendered.error.expect("usage error").to_string();
    assert!(message.contains("No callback function parameter found"));
}

#[test]
fn host_async_errors_reach_the_render_callback() {
    let engine = Engine::new();
    engine.register_function("fail_later", |engine, _, mut args| {
        let Some(RuntimeValue::Function(cb)) = args.pop() else {
            return Ok(RuntimeValue::Null);
        };
        engine.schedule(move |engine| {
            let _ = runtime::executor::call_function(
                engine,
                &cb,
                &RuntimeValue::Null,
                vec!["backend down".into()],
            );
        });
        Ok(RuntimeValue::Null)
    });
    let rendered = engine.render_source_blocking(
        "--this.async(fail_later, fn(err)\ngot #{err}\n--end)",
        RuntimeValue::Null,
    );
    assert_eq!(rendered.content, "got backend down\n");
    assert!(matches!(rendered.error, Some(RenderError::Custom(ref m)) if m == "backend down"));
}

#[test]
fn cached_renders_are_reused() {
    let reader = MemoryReader::new().with("cached.tpl", "--@(cache: param.id)\n--count()\nid #{param.id}");
    let engine = engine_with(&reader);
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    engine.register_function("count", move |_, _, _| {
        counter.set(counter.get() + 1);
        Ok(RuntimeValue::Null)
    });

    let params: RuntimeValue = json!({"id": 7}).into();
    for _ in 0..2 {
        let rendered = engine.render_blocking("cached.tpl", params.clone());
        assert_eq!(rendered.into_result().unwrap(), "id 7\n");
    }
    assert_eq!(runs.get(), 1);

    let other = engine.render_blocking("cached.tpl", json!({"id": 8}).into());
    assert_eq!(other.into_result().unwrap(), "id 8\n");
    assert_eq!(runs.get(), 2);

    let template = load(&engine, "cached.tpl");
    let first = template.runtime(&engine, Some(&params));
    let second = template.runtime(&engine, Some(&params));
    assert!(first.ptr_eq(&second));
    assert!(first.is_materialized());
}

#[test]
fn failed_loads_are_retried() {
    let reader = MemoryReader::new().with("page.tpl", "--@(cache 1)");
    let engine = engine_with(&reader);
    let failed = engine.render_blocking("page.tpl", RuntimeValue::Null);
    assert!(matches!(failed.error, Some(RenderError::Compile(_))));
    assert_eq!(engine.cached_templates(), 0);

    reader.insert("page.tpl", "fixed");
    let fixed = engine.render_blocking("page.tpl", RuntimeValue::Null);
    assert_eq!(fixed.into_result().unwrap(), "fixed\n");
    assert_eq!(reader.reads(), 2);
    assert_eq!(engine.cached_templates(), 1);

    engine.clear_cache();
    assert_eq!(engine.cached_templates(), 0);
}

#[test]
fn server_paths_follow_embeds() {
    let reader = MemoryReader::new()
        .with("page.tpl", "<a href=\"../img/x.png\">\n'.../'\n--this.embed('parts/nav.tpl')")
        .with("parts/nav.tpl", "<link href=\"./nav.css\">");
    let config = EngineConfig {
        server_path: Some("/site/docs/page.html".into()),
        ..EngineConfig::default()
    };
    let engine = Engine::builder().reader(reader).config(config).build();
    let rendered = engine.render_blocking(
        "page.tpl",
        json!({"req": {"headers": {"host": "example.org"}}}).into(),
    );
    assert_eq!(
        rendered.into_result().unwrap(),
        "<a href=\"/site/img/x.png\">\n\
         'http://example.org/site/docs/'\n\
         <link href=\"/site/docs/parts/nav.css\">\n"
    );
}

#[test]
fn file_reader_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.tpl"), "before\n--this.embed('part.tpl')\nafter").unwrap();
    std::fs::write(dir.path().join("part.tpl"), "part").unwrap();

    let root = dir.path().to_str().unwrap();
    let engine = Engine::builder().reader(FileReader::with_root(root)).build();
    let rendered = engine.render_blocking("main.tpl", RuntimeValue::Null);
    assert_eq!(rendered.into_result().unwrap(), "before\npart\nafter\n");

    let missing = engine.render_blocking("absent.tpl", RuntimeValue::Null);
    assert!(matches!(missing.error, Some(RenderError::Read { .. })));
}

#[test]
fn failing_async_function_still_completes_the_render() {
    let nested = render(
        "--this.async(defer, 1, fn(err)\n--this.async(len, 5, fn(e) end)\n--end)\ndone",
        json!({}),
    );
    assert!(matches!(nested.error, Some(RenderError::Runtime(ref e)) if e.to_string().contains("type error")));
    assert_eq!(nested.content, "done\n");

    let top = render("--this.async(len, 5, fn(e) end)\nafter", json!({}));
    assert!(matches!(top.error, Some(RenderError::Runtime(_))));
    assert_eq!(top.content, "after\n");

    let sync = Engine::new().run_source_sync("--this.async(len, 5, fn(e) end)\nafter", RuntimeValue::Null);
    assert!(matches!(sync.error, Some(RenderError::Runtime(_))));
}

#[test]
fn first_completed_render_owns_the_cache_entry() {
    let reader = MemoryReader::new().with(
        "slow.tpl",
        "--@(cache: param.id)\n--this.async(defer, param.delay, fn(e)\nid #{param.id}\n--end)",
    );
    let engine = engine_with(&reader);
    let template = load(&engine, "slow.tpl");

    let fast: RuntimeValue = json!({"id": 1, "delay": 0}).into();
    let slow: RuntimeValue = json!({"id": 1, "delay": 3}).into();
    let a = template.runtime(&engine, Some(&fast));
    let b = template.runtime(&engine, Some(&slow));
    assert!(!a.ptr_eq(&b));

    let outputs = Rc::new(RefCell::new(Vec::new()));
    for (block, params) in [(&b, slow.clone()), (&a, fast.clone())] {
        let sink = outputs.clone();
        engine.run(block, params, move |_, rendered| sink.borrow_mut().push(rendered.content));
    }
    engine.run_until_idle();
    assert_eq!(*outputs.borrow(), vec!["id 1\n".to_string(), "id 1\n".to_string()]);

    assert!(template.runtime(&engine, Some(&slow)).ptr_eq(&a));
    assert!(template.runtime(&engine, Some(&fast)).ptr_eq(&a));
}

#[test]
fn oversized_counts_are_errors() {
    let reader = MemoryReader::new()
        .with("i.tpl", "x")
        .with("page.tpl", "--this.embed('i.tpl', {}, 100000000000000000000)");
    let engine = engine_with(&reader);
    let rendered = engine.render_blocking("page.tpl", RuntimeValue::Null);
    assert!(rendered.error.unwrap().to_string().contains("out of range"));

    let range = render("#{len(range(100000000000000000000))}", json!({}));
    assert!(range.error.unwrap().to_string().contains("out of range"));
}

#[test]
fn printing_an_ancestor_is_rejected() {
    let rendered = render("--this.block('a')\n--this.print(this)\n--this.end()\nx", json!({}));
    let error = rendered.error.expect("usage error");
    assert!(error.to_string().contains("descendants"));
}

#[test]
fn queued_loads_complete_in_request_order() {
    let reader = MemoryReader::new().with("shared.tpl", "x");
    let engine = engine_with(&reader);
    let order = Rc::new(RefCell::new(Vec::new()));
    for n in 1..=3 {
        let order = order.clone();
        engine.load("shared.tpl", move |_, loaded| {
            assert!(loaded.is_ok());
            order.borrow_mut().push(n);
        });
    }
    engine.run_until_idle();
    assert_eq!(*order.borrow(), vec![1, 2, 3]);
    assert_eq!(reader.reads(), 1);
}

#[test]
fn embedded_filters_run_before_the_embed_indent() {
    let reader = MemoryReader::new()
        .with("inner.tpl", "--this.filter(upper, fn()\nab\n--end)")
        .with("outer.tpl", "<div>\n--this.embed('inner.tpl', {}, 2)\n</div>");
    let engine = engine_with(&reader);
    let rendered = engine.render_blocking("outer.tpl", RuntimeValue::Null);
    assert_eq!(rendered.into_result().unwrap(), "<div>\n  AB\n</div>\n");
}
