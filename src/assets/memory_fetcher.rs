use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
};

use super::{
    decode_image, decode_panorama, decode_text, pending, AssetFetcher, DecodedImage, FetchError, Panorama,
    Pending,
};

#[derive(Clone)]
enum Entry {
    Bytes(Vec<u8>),
    Image(DecodedImage),
    Panorama(Panorama),
}

type Entries = HashMap<String, Entry>;

struct Held {
    url: String,
    resolve: Box<dyn FnOnce(&Entries)>,
}

fn lookup<T>(entries: &Entries, url: &str, convert: fn(&str, &Entry) -> Result<T, FetchError>) -> Result<T, FetchError> {
    let entry = entries.get(url).ok_or_else(|| FetchError::NotFound(url.to_string()))?;
    convert(url, entry)
}

fn as_text(url: &str, entry: &Entry) -> Result<String, FetchError> {
    match entry {
        Entry::Bytes(bytes) => decode_text(url, bytes.clone()),
        _ => Err(FetchError::Decode { url: url.to_string(), message: "not text".into() }),
    }
}

fn as_binary(url: &str, entry: &Entry) -> Result<Vec<u8>, FetchError> {
    match entry {
        Entry::Bytes(bytes) => Ok(bytes.clone()),
        _ => Err(FetchError::Decode { url: url.to_string(), message: "not binary".into() }),
    }
}

fn as_image(url: &str, entry: &Entry) -> Result<DecodedImage, FetchError> {
    match entry {
        Entry::Bytes(bytes) => decode_image(url, bytes),
        Entry::Image(image) => Ok(image.clone()),
        Entry::Panorama(_) => Err(FetchError::Decode { url: url.to_string(), message: "not an 8-bit image".into() }),
    }
}

fn as_panorama(url: &str, entry: &Entry) -> Result<Panorama, FetchError> {
    match entry {
        Entry::Bytes(bytes) => decode_panorama(url, bytes),
        Entry::Panorama(panorama) => Ok(panorama.clone()),
        Entry::Image(_) => Err(FetchError::Decode { url: url.to_string(), message: "not a panorama".into() }),
    }
}

/// Serves assets from memory. In deferred mode every request is held until released,
/// which lets callers choose the order in which asynchronous loads complete.
#[derive(Default)]
pub struct MemoryFetcher {
    entries: RefCell<Entries>,
    held: RefCell<Vec<Held>>,
    deferred: Cell<bool>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deferred() -> Self {
        let fetcher = Self::default();
        fetcher.deferred.set(true);
        fetcher
    }

    pub fn insert(&self, url: &str, bytes: impl Into<Vec<u8>>) -> &Self {
        self.entries.borrow_mut().insert(url.to_string(), Entry::Bytes(bytes.into()));
        self
    }

    pub fn insert_image(&self, url: &str, image: DecodedImage) -> &Self {
        self.entries.borrow_mut().insert(url.to_string(), Entry::Image(image));
        self
    }

    pub fn insert_panorama(&self, url: &str, panorama: Panorama) -> &Self {
        self.entries.borrow_mut().insert(url.to_string(), Entry::Panorama(panorama));
        self
    }

    pub fn held_count(&self) -> usize {
        self.held.borrow().len()
    }

    /// Resolves every held request for `url`; returns how many there were.
    pub fn release(&self, url: &str) -> usize {
        self.release_where(|held| held == url)
    }

    pub fn release_all(&self) -> usize {
        self.release_where(|_| true)
    }

    fn release_where(&self, matches: impl Fn(&str) -> bool) -> usize {
        let (ready, kept): (Vec<Held>, Vec<Held>) =
            std::mem::take(&mut *self.held.borrow_mut()).into_iter().partition(|held| matches(&held.url));
        *self.held.borrow_mut() = kept;
        let entries = self.entries.borrow();
        let count = ready.len();
        for held in ready {
            (held.resolve)(&entries);
        }
        count
    }

    fn fetch<T: 'static>(&self, url: &str, convert: fn(&str, &Entry) -> Result<T, FetchError>) -> Pending<T> {
        if !self.deferred.get() {
            return match lookup(&self.entries.borrow(), url, convert) {
                Ok(value) => Pending::ready(value),
                Err(error) => Pending::failed(error),
            };
        }
        let (done, result) = pending();
        let owned = url.to_string();
        self.held.borrow_mut().push(Held {
            url: url.to_string(),
            resolve: Box::new(move |entries: &Entries| done.complete(lookup(entries, &owned, convert))),
        });
        result
    }
}

impl AssetFetcher for MemoryFetcher {
    fn fetch_text(&self, url: &str) -> Pending<String> {
        self.fetch(url, as_text)
    }

    fn fetch_binary(&self, url: &str) -> Pending<Vec<u8>> {
        self.fetch(url, as_binary)
    }

    fn fetch_image(&self, url: &str) -> Pending<DecodedImage> {
        self.fetch(url, as_image)
    }

    fn fetch_panorama(&self, url: &str) -> Pending<Panorama> {
        self.fetch(url, as_panorama)
    }
}
