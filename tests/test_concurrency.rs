use std::time::Duration;

use luacall::{Config, Interpreter, InterpreterWorker, SharedInterpreter, WorkerError, WorkerId, WorkerPool};

fn counter() -> Result<Interpreter, luacall::InterpreterError> {
    let mut lua = Interpreter::new()?;
    lua.load(
        "counter.lua",
        r#"
        n = 0
        function next_id(s) n = n + 1; return s .. n end
        function slow(s)
            local deadline = os.clock() + tonumber(s)
            while os.clock() < deadline do end
            return "done"
        end
        "#,
    )?;
    Ok(lua)
}

#[test]
fn test_worker_serializes_calls() {
    let worker = InterpreterWorker::spawn(WorkerId(0), 16, counter).unwrap();
    let results: Vec<_> = (0..20)
        .map(|_| worker.call("next_id", "id-").unwrap().as_str().map(str::to_string))
        .collect();
    let expected: Vec<_> = (1..=20).map(|i| Some(format!("id-{}", i))).collect();
    assert_eq!(results, expected);
}

#[test]
fn test_timeout_does_not_poison_worker() {
    let worker = InterpreterWorker::spawn(WorkerId(1), 4, counter).unwrap();
    let err = worker.call_timeout("slow", "0.3", Duration::from_millis(20)).unwrap_err();
    assert_eq!(err, WorkerError::Timeout);

    let result = worker.call("next_id", "x").unwrap();
    assert_eq!(result.as_str(), Some("x1"));
}

#[test]
fn test_pool_spreads_calls() {
    let pool = WorkerPool::new(4, 16, counter).unwrap();
    let mut values: Vec<_> = (0..8)
        .map(|_| pool.call("next_id", "").unwrap().as_str().unwrap().to_string())
        .collect();
    values.sort();
    assert_eq!(values, vec!["1", "1", "1", "1", "2", "2", "2", "2"]);
    assert_eq!(pool.metrics().get_counter("next_id.success"), 8);
}

#[test]
fn test_pool_from_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("svc.lua"), "function svc(s) return env .. ':' .. s end").unwrap();
    let path = dir.path().join("luacall.toml");
    std::fs::write(
        &path,
        "[runtime]\nscripts = [\"*.lua\"]\n[runtime.globals]\nenv = \"test\"\n[workers]\ncount = 2\ntimeout_ms = 1000\n",
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    let pool = WorkerPool::from_config(&config).unwrap();
    assert_eq!(pool.size(), 2);
    assert_eq!(pool.call("svc", "ping").unwrap().as_str(), Some("test:ping"));
}

#[test]
fn test_pool_startup_failure() {
    let result = WorkerPool::new(2, 4, || {
        let mut lua = Interpreter::new()?;
        lua.load("bad.lua", "this is not lua")?;
        Ok(lua)
    });
    assert!(matches!(result, Err(WorkerError::Startup(_))));
}

#[test]
fn test_shared_interpreter_threads() {
    let shared = SharedInterpreter::new(counter().unwrap());
    std::thread::scope(|scope| {
        for _ in 0..4 {
            let shared = shared.clone();
            scope.spawn(move || {
                for _ in 0..100 {
                    assert!(shared.invoke("next_id", "").is_success());
                }
            });
        }
    });
    assert_eq!(shared.invoke("next_id", "").as_str(), Some("401"));
}

#[tokio::test]
async fn test_call_async() {
    let pool = WorkerPool::new(2, 8, counter).unwrap();
    let (a, b) = tokio::join!(pool.call_async("next_id", "a"), pool.call_async("next_id", "b"));
    assert_eq!(a.unwrap().as_str(), Some("a1"));
    assert_eq!(b.unwrap().as_str(), Some("b1"));
}
