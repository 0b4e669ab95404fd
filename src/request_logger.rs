use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};
use std::time::Instant;

use crate::auth::guards::CallerId;

struct RequestStart(Instant);

/// Fairing to log one line per HTTP request with timing and the authenticated caller.
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(|| RequestStart(Instant::now()));
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let start = request.local_cache(|| RequestStart(Instant::now()));
        let duration = start.0.elapsed();

        // Only set once the AuthUser guard succeeded.
        let caller = match request.local_cache(CallerId::default) {
            CallerId(Some(id)) => id.to_string(),
            CallerId(None) => "-".to_string(),
        };

        let status = response.status();
        let level = if status.code >= 500 {
            log::Level::Warn
        } else {
            log::Level::Info
        };
        log::log!(
            level,
            "{} {} -> {} ({:.2}ms) caller={}",
            request.method(),
            request.uri().path(),
            status.code,
            duration.as_secs_f64() * 1000.0,
            caller
        );
    }
}
