//! Integration tests against headless Chrome
#![cfg(feature = "cdp")]

use docshot::cdp::{self, CdpSession};
use docshot::output::png_dimensions;
use docshot::{capture, BrowserConfig, CaptureOptions, CaptureRequest, Error, PageSession};
use std::sync::Once;
use tiny_http::{Response, Server};

static INIT: Once = Once::new();

const ARTICLE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Docs</title>
<style>
  body { margin: 0; font-family: sans-serif; }
  section { height: 300px; background: #eef; }
  .spacer { height: 2000px; }
</style>
</head>
<body>
<section id="a">A</section>
<div class="spacer"></div>
<section id="c">C</section>
</body>
</html>"#;

const TALL: &str = r#"<!DOCTYPE html>
<html><head><style>body { margin: 0; } div { height: 1000px; border-bottom: 1px solid #ccc; }</style></head>
<body><main></main>
<script>
  const main = document.querySelector('main');
  for (let i = 0; i < 40; i++) main.appendChild(document.createElement('div'));
</script>
</body></html>"#;

/// Start a simple test HTTP server
fn start_test_server() -> String {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let server = Server::http("127.0.0.1:18090").unwrap();
            for request in server.incoming_requests() {
                let body = match request.url() {
                    "/" => Some(ARTICLE),
                    "/tall" => Some(TALL),
                    _ => None,
                };
                let response = match body {
                    Some(html) => Response::from_string(html).with_header(
                        "Content-Type: text/html; charset=utf-8"
                            .parse::<tiny_http::Header>()
                            .unwrap(),
                    ),
                    None => Response::from_string("Not Found").with_status_code(404),
                };
                let _ = request.respond(response);
            }
        });
        // Give the server time to start
        std::thread::sleep(std::time::Duration::from_millis(100));
    });

    "http://127.0.0.1:18090".to_string()
}

fn session() -> (headless_chrome::Browser, CdpSession) {
    let config = BrowserConfig::default();
    let browser = cdp::launch(&config).expect("Failed to launch Chrome");
    let session = CdpSession::new(&browser, config).expect("Failed to open tab");
    (browser, session)
}

fn request(json: &str) -> CaptureRequest {
    CaptureRequest::from_options(CaptureOptions::from_json(json).unwrap()).unwrap()
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_full_page_capture() {
    let base_url = start_test_server();
    let (_browser, session) = session();
    session.load_url(&base_url).expect("Failed to load URL");

    let result = capture(&session, &request(r#"{"scrollToLoad": false}"#)).unwrap();
    assert_eq!(result.len(), 1);
    let (w, h) = png_dimensions(&result.buffers()[0]).unwrap();
    assert_eq!(w, 1280);
    assert_eq!(h, 2600);
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_stitch_vs_union() {
    let base_url = start_test_server();
    let (_browser, session) = session();
    session.load_url(&base_url).expect("Failed to load URL");
    let before = session.evaluate("document.body.innerHTML").unwrap();

    let union = capture(&session, &request(r##"{"selector": ["#a", "#c"], "selectorMode": "union"}"##)).unwrap();
    let stitch = capture(&session, &request(r##"{"selector": ["#a", "#c"], "selectorMode": "stitch"}"##)).unwrap();

    let (_, union_h) = png_dimensions(&union.buffers()[0]).unwrap();
    let (_, stitch_h) = png_dimensions(&stitch.buffers()[0]).unwrap();
    assert_eq!(union_h, 2600);
    assert_eq!(stitch_h, 616);
    assert_eq!(session.evaluate("document.body.innerHTML").unwrap(), before);
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_tall_page_splits_at_blocks() {
    let base_url = start_test_server();
    let (_browser, session) = session();
    session.load_url(&format!("{}/tall", base_url)).expect("Failed to load URL");

    let result = capture(&session, &request(r#"{"scrollToLoad": false}"#)).unwrap();
    assert!(result.len() > 1);
    for buffer in result.buffers() {
        let (_, h) = png_dimensions(buffer).unwrap();
        assert!(h <= 14_000);
    }
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_set_content_and_empty_selector() {
    let (_browser, session) = session();
    session
        .set_content("<html><body><p id='x'>hello</p></body></html>")
        .expect("Failed to set content");

    let err = capture(&session, &request(r#"{"selector": ".missing"}"#)).unwrap_err();
    assert!(matches!(err, Error::SelectorEmpty(_)));

    let ok = capture(&session, &request(r##"{"selector": "#x", "selectorMode": "first"}"##)).unwrap();
    assert_eq!(ok.len(), 1);
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_async_pages_capture_in_parallel() {
    let base_url = start_test_server();
    let browser = docshot::Browser::new(None).await.expect("Failed to launch Chrome");

    let first = browser.new_page().await.unwrap();
    let second = browser.new_page().await.unwrap();
    first.goto(&base_url).await.unwrap();
    second.goto(&format!("{}/tall", base_url)).await.unwrap();

    let (a, b) = tokio::join!(
        first.capture(request(r#"{"fullPage": false}"#)),
        second.capture(request(r#"{"fullPage": false}"#)),
    );
    assert_eq!(a.unwrap().len(), 1);
    assert_eq!(b.unwrap().len(), 1);

    first.close().await.unwrap();
    second.close().await.unwrap();
}
