//! Chromium (CDP) implementation of the browser driver traits.
//!
//! One launched browser per worker slot: its proxy identity is fixed at
//! launch via `--proxy-server`, and downloads are routed into the worker's
//! private directory through `Browser.setDownloadBehavior`.

#![cfg(feature = "browser")]

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::driver::{BrowserDriver, DriverError, DriverFactory, PageElement};
use crate::models::ProxyRecord;

const FIND_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Common Chrome executable locations, checked before falling back to PATH.
const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/google/chrome/google-chrome",
];

fn find_chrome() -> Result<PathBuf, DriverError> {
    for path in CHROME_PATHS {
        let p = Path::new(path);
        if p.exists() {
            info!("found Chrome at {}", path);
            return Ok(p.to_path_buf());
        }
    }
    for cmd in &[
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    info!("found Chrome in PATH: {}", path);
                    return Ok(PathBuf::from(path));
                }
            }
        }
    }
    Err(DriverError::Launch(
        "Chrome/Chromium not found; install chromium or google-chrome".to_string(),
    ))
}

/// Launches one headless Chrome per worker slot.
pub struct CdpLauncher {
    headless: bool,
    chrome_args: Vec<String>,
}

impl CdpLauncher {
    pub fn new(headless: bool, chrome_args: Vec<String>) -> Self {
        CdpLauncher {
            headless,
            chrome_args,
        }
    }
}

#[async_trait]
impl DriverFactory for CdpLauncher {
    async fn create(
        &self,
        proxy: Option<&ProxyRecord>,
        download_dir: &Path,
    ) -> Result<Box<dyn BrowserDriver>, DriverError> {
        let chrome = find_chrome()?;
        let mut builder = BrowserConfig::builder().chrome_executable(chrome);

        // with_head means NOT headless, confusingly.
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(record) = proxy {
            builder = builder.arg(format!("--proxy-server={}", record.endpoint));
        }
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        for arg in &self.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(DriverError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.display().to_string())
            .build()
            .map_err(DriverError::Launch)?;
        page.execute(behavior)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        debug!(downloads = %download_dir.display(), "browser session ready");
        Ok(Box::new(CdpDriver {
            _browser: browser,
            page,
        }))
    }
}

/// One owned browser session; the process is torn down when this drops.
pub struct CdpDriver {
    _browser: Browser,
    page: Page,
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Navigation(e.to_string()))
    }

    async fn wait_for_element(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Box<dyn PageElement>, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.page.find_element(selector).await {
                Ok(element) => return Ok(Box::new(CdpElement { inner: element })),
                Err(_) if Instant::now() < deadline => {
                    tokio::time::sleep(FIND_RETRY_INTERVAL).await;
                }
                Err(_) => {
                    return Err(DriverError::Timeout {
                        selector: selector.to_string(),
                    })
                }
            }
        }
    }
}

struct CdpElement {
    inner: Element,
}

#[async_trait]
impl PageElement for CdpElement {
    async fn attribute(&self, name: &str) -> Result<Option<String>, DriverError> {
        self.inner
            .attribute(name)
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))
    }

    async fn text(&self) -> Result<String, DriverError> {
        Ok(self
            .inner
            .inner_text()
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?
            .unwrap_or_default())
    }

    async fn click(&self) -> Result<(), DriverError> {
        self.inner
            .click()
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Protocol(e.to_string()))
    }
}
