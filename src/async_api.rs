use crate::cdp::{self, CdpSession};
use crate::{capture, BrowserConfig, CaptureRequest, CaptureResult, Error, Result};
use std::sync::mpsc::{self, Sender};
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Goto(String, oneshot::Sender<Result<()>>),
    SetContent(String, oneshot::Sender<Result<()>>),
    Capture(Box<CaptureRequest>, oneshot::Sender<Result<CaptureResult>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly handle to one Chrome process.
///
/// Launching is blocking, so it happens on a background thread. The
/// underlying browser is shared by every page opened from this handle.
#[derive(Clone)]
pub struct Browser {
    inner: headless_chrome::Browser,
    config: BrowserConfig,
}

/// A page backed by its own worker thread and tab.
///
/// The worker thread owns a synchronous `CdpSession` and executes commands
/// sent from async tasks, so captures on different pages run in parallel
/// while each page handles one command at a time.
#[derive(Clone)]
pub struct Page {
    cmd_tx: Sender<Command>,
}

impl Browser {
    /// Launch a browser on a background thread.
    pub async fn new(config: Option<BrowserConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();
        let (init_tx, init_rx) = oneshot::channel();

        let launch_config = config.clone();
        thread::spawn(move || {
            let _ = init_tx.send(cdp::launch(&launch_config));
        });

        let inner = init_rx
            .await
            .map_err(|e| Error::Other(format!("Browser launch canceled: {}", e)))??;

        Ok(Self { inner, config })
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Open a new tab driven by a dedicated worker thread.
    pub async fn new_page(&self) -> Result<Page> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx): (oneshot::Sender<Result<()>>, oneshot::Receiver<Result<()>>) =
            oneshot::channel();

        let browser = self.inner.clone();
        let config = self.config.clone();
        thread::spawn(move || {
            let session = match CdpSession::new(&browser, config) {
                Ok(s) => s,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };
            let _ = init_tx.send(Ok(()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Goto(url, resp) => {
                        let _ = resp.send(session.load_url(&url));
                    }
                    Command::SetContent(html, resp) => {
                        let _ = resp.send(session.set_content(&html));
                    }
                    Command::Capture(request, resp) => {
                        let _ = resp.send(capture(&session, &request));
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(session.close());
                        break;
                    }
                }
            }
        });

        init_rx
            .await
            .map_err(|e| Error::Other(format!("Page init canceled: {}", e)))??;

        Ok(Page { cmd_tx })
    }
}

impl Page {
    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| Error::Other("page worker has shut down".into()))
    }

    /// Navigate to a URL
    pub async fn goto(&self, url: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Goto(url.to_string(), tx))?;
        rx.await
            .map_err(|e| Error::Other(format!("Goto canceled: {}", e)))?
    }

    /// Replace the document with `html`
    pub async fn set_content(&self, html: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SetContent(html.to_string(), tx))?;
        rx.await
            .map_err(|e| Error::Other(format!("SetContent canceled: {}", e)))?
    }

    /// Capture the current document
    pub async fn capture(&self, request: CaptureRequest) -> Result<CaptureResult> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Capture(Box::new(request), tx))?;
        rx.await
            .map_err(|e| Error::Other(format!("Capture canceled: {}", e)))?
    }

    /// Close the tab and stop the worker
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Close(tx))?;
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))?
    }
}
