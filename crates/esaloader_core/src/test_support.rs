use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::rc::Rc;
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use reqwest::Url;

use crate::http::{HttpOutcome, HttpTransport, Requester, RetryPolicy, Sleeper};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedCall {
    pub url: String,
    pub bearer_token: Option<String>,
}

#[derive(Default)]
struct FakeState {
    queue: VecDeque<HttpOutcome>,
    routes: HashMap<String, HttpOutcome>,
    calls: Vec<RecordedCall>,
}

/// Routed URLs always answer the same way; everything else pops the script,
/// then falls back to 404.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    state: Rc<RefCell<FakeState>>,
}

impl FakeTransport {
    pub fn scripted(outcomes: impl IntoIterator<Item = HttpOutcome>) -> Self {
        let transport = Self::default();
        transport.state.borrow_mut().queue.extend(outcomes);
        transport
    }

    pub fn route(self, url: &str, outcome: HttpOutcome) -> Self {
        self.state
            .borrow_mut()
            .routes
            .insert(url.to_string(), outcome);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.borrow().calls.clone()
    }
}

impl HttpTransport for FakeTransport {
    fn get(&mut self, url: &Url, bearer_token: Option<&str>) -> HttpOutcome {
        let mut state = self.state.borrow_mut();
        state.calls.push(RecordedCall {
            url: url.to_string(),
            bearer_token: bearer_token.map(str::to_string),
        });
        if let Some(outcome) = state.routes.get(url.as_str()) {
            return outcome.clone();
        }
        state.queue.pop_front().unwrap_or(HttpOutcome::NotFound)
    }
}

#[derive(Clone, Default)]
pub(crate) struct RecordingSleeper {
    sleeps: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
    }
}

pub(crate) fn requester(transport: FakeTransport, sleeper: RecordingSleeper) -> Requester {
    Requester::new(
        Box::new(transport),
        Box::new(sleeper),
        RetryPolicy::default(),
    )
}

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([200, 40, 40]));
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("encode png");
    cursor.into_inner()
}
