//! A service with one `about` endpoint, a capability and a terminate hook.
//!
//! Run with:
//!   TORTILLA_PORT=3000 TORTILLA_CORS=true cargo run --example about
//!
//! Try:
//!   curl http://localhost:3000/about
//!   curl http://localhost:3000/about/name
//!   curl -i -X OPTIONS http://localhost:3000/about -H 'origin: http://localhost'
//!
//! Stop it with Ctrl-C and watch the termination logs.

use std::time::Duration;

use http::Method;
use serde::Serialize;
use tortilla::shutdown::hook;
use tortilla::{App, BoxError, Capabilities, Context, HandlerError, Request, Response, Router, Settings, logging, wrap};

#[derive(Clone, Serialize)]
struct About {
    name: &'static str,
    version: &'static str,
}

#[tokio::main]
async fn main() {
    let settings = match Settings::default().apply_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = logging::init(&settings.log) {
        eprintln!("{err}");
    }

    let routes = Router::new()
        .on(Method::GET, "/about", wrap(about))
        .on(Method::GET, "/about/{field}", wrap(about_field));

    App::new(settings)
        .routes(routes)
        .capabilities(|_: &Request, _: &Response| {
            Capabilities::new().with(
                "about",
                About { name: env!("CARGO_PKG_NAME"), version: env!("CARGO_PKG_VERSION") },
            )
        })
        .on_terminate(hook(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<(), BoxError>(())
        }))
        .run()
        .await
        .exit();
}

// GET /about → {"name":"tortilla","version":"0.1.0"}
async fn about(ctx: Context) -> Result<(), HandlerError> {
    let about = ctx
        .capability::<About>("about")
        .ok_or_else(HandlerError::unknown)?;
    ctx.logger().info("serving about");
    ctx.reply().ok(tortilla::Payload::json(about)?)?;
    Ok(())
}

// GET /about/{field} → the single field as text, 404 for anything else
async fn about_field(ctx: Context) -> Result<(), HandlerError> {
    let about = ctx
        .capability::<About>("about")
        .ok_or_else(HandlerError::unknown)?;
    let value = match ctx.get_param("field") {
        Some("name") => about.name,
        Some("version") => about.version,
        Some(other) => return Err(HandlerError::not_found(format!("no field `{other}`"))),
        None => return Err(HandlerError::bad_request("missing field")),
    };
    ctx.reply().ok(value)?;
    Ok(())
}
