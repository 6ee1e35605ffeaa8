use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};
use std::time::Instant;

/// Fairing to log one line per HTTP request with timing.
///
/// Health probes are logged at debug so that periodic external triggers
/// (cron hitting the dispatch endpoint, load-balancer health checks) do
/// not drown out dispatch activity in the logs.
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
        request.local_cache(|| Instant::now());
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let start_time = request.local_cache(|| Instant::now());
        let duration = start_time.elapsed();

        let method = request.method();
        let uri = request.uri();
        let status = response.status();

        let line = format!(
            "{} {} -> {} ({:.2}ms)",
            method,
            uri,
            status.code,
            duration.as_secs_f64() * 1000.0
        );

        if uri.path().ends_with("/health") {
            log::debug!("{}", line);
        } else {
            log::info!("{}", line);
        }
    }
}
