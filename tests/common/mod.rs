#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use pawnhost::{HostController, PawnValue, Runtime, RuntimeDelegate, RuntimeOptions};

/// Delegate that records everything the runtime reports.
#[derive(Default)]
pub struct RecordingDelegate {
    pub output: RefCell<Vec<String>>,
    pub errors: RefCell<Vec<(String, u32, String)>>,
    pub tests_done: RefCell<Vec<(u32, u32)>>,
}

impl RuntimeDelegate for RecordingDelegate {
    fn on_script_output(&self, message: &str) {
        self.output.borrow_mut().push(message.to_string());
    }

    fn on_script_error(&self, filename: &str, line: u32, message: &str) {
        self.errors
            .borrow_mut()
            .push((filename.to_string(), line, message.to_string()));
    }

    fn on_script_tests_done(&self, total_tests: u32, failed_tests: u32) {
        self.tests_done.borrow_mut().push((total_tests, failed_tests));
    }
}

/// Controller stub with scripted native responses.
#[derive(Default)]
pub struct StubController {
    pub minimized: RefCell<HashSet<i32>>,
    pub invocations: RefCell<Vec<(String, Vec<PawnValue>)>>,
    pub responses: RefCell<HashMap<String, PawnValue>>,
}

impl HostController for StubController {
    fn is_player_minimized(&self, player_id: i32, _current_time: f64) -> bool {
        self.minimized.borrow().contains(&player_id)
    }

    fn invoke_native(&self, name: &str, arguments: &[PawnValue]) -> Option<PawnValue> {
        self.invocations
            .borrow_mut()
            .push((name.to_string(), arguments.to_vec()));
        self.responses.borrow().get(name).cloned()
    }
}

pub struct TestHost {
    pub runtime: Runtime,
    pub delegate: Rc<RecordingDelegate>,
    pub controller: Rc<StubController>,
}

/// A runtime that has not been initialized yet, for tests that register
/// events first.
pub fn create_uninitialized_host_in(source_directory: PathBuf) -> TestHost {
    let delegate = Rc::new(RecordingDelegate::default());
    let controller = Rc::new(StubController::default());

    let options = RuntimeOptions {
        source_directory,
        boot_deadline: Duration::from_secs(30),
    };

    let runtime = Runtime::create(
        options,
        Rc::clone(&delegate) as Rc<dyn RuntimeDelegate>,
        Rc::clone(&controller) as Rc<dyn HostController>,
    )
    .expect("create runtime");

    TestHost {
        runtime,
        delegate,
        controller,
    }
}

pub fn create_uninitialized_host() -> TestHost {
    create_uninitialized_host_in(PathBuf::from("javascript"))
}

pub fn create_host() -> TestHost {
    let host = create_uninitialized_host();
    host.runtime.initialize().expect("initialize runtime");
    host
}

pub fn create_host_in(source_directory: PathBuf) -> TestHost {
    let host = create_uninitialized_host_in(source_directory);
    host.runtime.initialize().expect("initialize runtime");
    host
}

/// Ticks frames until `condition` evaluates to true or the deadline passes.
pub fn pump_until(host: &TestHost, condition: &str, frames: usize) -> bool {
    for _ in 0..frames {
        host.runtime.on_frame();
        let done: bool = host
            .runtime
            .eval_with(condition, "pump-until.js")
            .expect("evaluate condition");
        if done {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
