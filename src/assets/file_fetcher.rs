use std::path::{Path, PathBuf};

use crossbeam::channel::{unbounded, Receiver, Sender};

use super::{
    decode_image, decode_panorama, decode_text, pending, AssetFetcher, Completer, DecodedImage, FetchError,
    Panorama, Pending,
};

enum IoRequest {
    Text { path: PathBuf, url: String, done: Completer<String> },
    Binary { path: PathBuf, done: Completer<Vec<u8>> },
    Image { path: PathBuf, url: String, done: Completer<DecodedImage> },
    Panorama { path: PathBuf, url: String, done: Completer<Panorama> },
}

fn load_bin(path: &Path) -> Result<Vec<u8>, FetchError> {
    std::fs::read(path).map_err(|source| FetchError::Io { path: path.to_path_buf(), source })
}

fn io_worker_loop(rx: Receiver<IoRequest>) {
    while let Ok(req) = rx.recv() {
        match req {
            IoRequest::Text { path, url, done } => {
                done.complete(load_bin(&path).and_then(|bytes| decode_text(&url, bytes)));
            }
            IoRequest::Binary { path, done } => done.complete(load_bin(&path)),
            IoRequest::Image { path, url, done } => {
                done.complete(load_bin(&path).and_then(|bytes| decode_image(&url, &bytes)));
            }
            IoRequest::Panorama { path, url, done } => {
                done.complete(load_bin(&path).and_then(|bytes| decode_panorama(&url, &bytes)));
            }
        }
    }
}

/// Reads assets below a root directory on a small pool of worker threads. Decoding
/// happens on the workers too, so the frame loop only ever receives finished values.
pub struct FileFetcher {
    root: PathBuf,
    req_tx: Option<Sender<IoRequest>>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>, threads: usize) -> Self {
        let (req_tx, req_rx) = unbounded();
        let workers = (0..threads.max(1))
            .map(|_| {
                let rx = req_rx.clone();
                std::thread::spawn(move || {
                    io_worker_loop(rx);
                })
            })
            .collect();

        Self { root: root.into(), req_tx: Some(req_tx), workers }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn send<T>(&self, request: IoRequest, result: Pending<T>) -> Pending<T> {
        match &self.req_tx {
            Some(tx) if tx.send(request).is_ok() => result,
            _ => Pending::failed(FetchError::Disconnected),
        }
    }
}

impl AssetFetcher for FileFetcher {
    fn fetch_text(&self, url: &str) -> Pending<String> {
        log::debug!("fetch text {url}");
        let (done, result) = pending();
        self.send(IoRequest::Text { path: self.root.join(url), url: url.to_string(), done }, result)
    }

    fn fetch_binary(&self, url: &str) -> Pending<Vec<u8>> {
        log::debug!("fetch binary {url}");
        let (done, result) = pending();
        self.send(IoRequest::Binary { path: self.root.join(url), done }, result)
    }

    fn fetch_image(&self, url: &str) -> Pending<DecodedImage> {
        log::debug!("fetch image {url}");
        let (done, result) = pending();
        self.send(IoRequest::Image { path: self.root.join(url), url: url.to_string(), done }, result)
    }

    fn fetch_panorama(&self, url: &str) -> Pending<Panorama> {
        log::debug!("fetch panorama {url}");
        let (done, result) = pending();
        self.send(IoRequest::Panorama { path: self.root.join(url), url: url.to_string(), done }, result)
    }
}

impl Drop for FileFetcher {
    fn drop(&mut self) {
        // closing the request channel ends every worker loop
        self.req_tx = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait<T>(mut pending: Pending<T>) -> Result<T, FetchError> {
        loop {
            if let Some(result) = pending.take() {
                return result;
            }
            std::thread::yield_now();
        }
    }

    #[test]
    fn reads_relative_to_root() {
        let dir = std::env::temp_dir().join(format!("pbr-viewer-fetch-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("shaders")).unwrap();
        std::fs::write(dir.join("shaders/std_vs.glsl"), "#version 450\n").unwrap();

        let fetcher = FileFetcher::new(&dir, 2);
        assert_eq!(wait(fetcher.fetch_text("shaders/std_vs.glsl")).unwrap(), "#version 450\n");
        assert_eq!(wait(fetcher.fetch_binary("shaders/std_vs.glsl")).unwrap().len(), 13);
        assert!(matches!(wait(fetcher.fetch_binary("missing.bin")), Err(FetchError::Io { .. })));

        drop(fetcher);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
