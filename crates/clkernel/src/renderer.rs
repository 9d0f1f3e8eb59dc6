//
// renderer.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Turns display objects into MIME bundles.
//!
//! Renderers are registered against a display kind. Kinds form a fixed
//! ancestry (`Png` is an `Image`, every kind is an `Any`), and rendering an
//! object consults the renderers for its own kind first, then each ancestor
//! in turn. When two renderers produce the same MIME type, the one
//! registered for the more specific kind wins.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use serde_json::{Map, Value};

/// Rendered representations of an object, keyed by MIME type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MimeBundle {
    pub data: Map<String, Value>,
    pub metadata: Map<String, Value>,
}

impl MimeBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a representation.
    pub fn with(mut self, mime_type: &str, payload: Value) -> Self {
        self.data.insert(mime_type.to_string(), payload);
        self
    }

    /// Merge another bundle into this one. Entries already present win.
    fn merge_missing(&mut self, other: MimeBundle) {
        for (mime_type, payload) in other.data {
            self.data.entry(mime_type).or_insert(payload);
        }
        for (mime_type, meta) in other.metadata {
            self.metadata.entry(mime_type).or_insert(meta);
        }
    }
}

/// A value the execution backend wants shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayObject {
    Text(String),
    Json(Value),
    Html(String),
    Markdown(String),
    Svg(String),
    Png(Vec<u8>),
    Jpeg(Vec<u8>),
    /// An already-rendered bundle, passed through as is
    Bundle(MimeBundle),
}

impl DisplayObject {
    pub fn kind(&self) -> DisplayKind {
        match self {
            DisplayObject::Text(_) => DisplayKind::Text,
            DisplayObject::Json(_) => DisplayKind::Json,
            DisplayObject::Html(_) => DisplayKind::Html,
            DisplayObject::Markdown(_) => DisplayKind::Markdown,
            DisplayObject::Svg(_) => DisplayKind::Svg,
            DisplayObject::Png(_) => DisplayKind::Png,
            DisplayObject::Jpeg(_) => DisplayKind::Jpeg,
            DisplayObject::Bundle(_) => DisplayKind::Bundle,
        }
    }

    /// A plain-text rendering of the object.
    pub fn plain_text(&self) -> String {
        match self {
            DisplayObject::Text(text)
            | DisplayObject::Html(text)
            | DisplayObject::Markdown(text)
            | DisplayObject::Svg(text) => text.clone(),
            DisplayObject::Json(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            DisplayObject::Png(bytes) => format!("<image/png, {} bytes>", bytes.len()),
            DisplayObject::Jpeg(bytes) => format!("<image/jpeg, {} bytes>", bytes.len()),
            DisplayObject::Bundle(bundle) => match bundle.data.get("text/plain") {
                Some(Value::String(text)) => text.clone(),
                _ => String::new(),
            },
        }
    }
}

/// The type discriminator renderers are registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayKind {
    Any,
    Text,
    Json,
    Html,
    Markdown,
    Image,
    Svg,
    Png,
    Jpeg,
    Bundle,
}

impl DisplayKind {
    pub fn parent(&self) -> Option<DisplayKind> {
        match self {
            DisplayKind::Any => None,
            DisplayKind::Html | DisplayKind::Markdown => Some(DisplayKind::Text),
            DisplayKind::Png | DisplayKind::Jpeg | DisplayKind::Svg => Some(DisplayKind::Image),
            DisplayKind::Text | DisplayKind::Json | DisplayKind::Image | DisplayKind::Bundle => {
                Some(DisplayKind::Any)
            }
        }
    }

    /// This kind followed by its ancestors, most specific first.
    pub fn ancestry(&self) -> Vec<DisplayKind> {
        let mut chain = vec![*self];
        let mut current = *self;
        while let Some(parent) = current.parent() {
            chain.push(parent);
            current = parent;
        }
        chain
    }
}

/// Produces some representations of a display object.
pub trait Renderer: Send + Sync {
    /// Render the object, or return `None` if this renderer has nothing to
    /// contribute for it.
    fn render(&self, object: &DisplayObject) -> Option<MimeBundle>;
}

/// `text/plain` for anything but a bundle, which brings its own.
struct PlainTextRenderer;

impl Renderer for PlainTextRenderer {
    fn render(&self, object: &DisplayObject) -> Option<MimeBundle> {
        if let DisplayObject::Bundle(_) = object {
            return None;
        }
        Some(MimeBundle::new().with("text/plain", Value::String(object.plain_text())))
    }
}

struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, object: &DisplayObject) -> Option<MimeBundle> {
        match object {
            DisplayObject::Json(value) => {
                Some(MimeBundle::new().with("application/json", value.clone()))
            }
            _ => None,
        }
    }
}

struct HtmlRenderer;

impl Renderer for HtmlRenderer {
    fn render(&self, object: &DisplayObject) -> Option<MimeBundle> {
        match object {
            DisplayObject::Html(html) => {
                Some(MimeBundle::new().with("text/html", Value::String(html.clone())))
            }
            _ => None,
        }
    }
}

struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn render(&self, object: &DisplayObject) -> Option<MimeBundle> {
        match object {
            DisplayObject::Markdown(md) => {
                Some(MimeBundle::new().with("text/markdown", Value::String(md.clone())))
            }
            _ => None,
        }
    }
}

/// Binary and vector images. Images get a descriptive `text/plain` in place
/// of their raw source.
struct ImageRenderer;

impl Renderer for ImageRenderer {
    fn render(&self, object: &DisplayObject) -> Option<MimeBundle> {
        let engine = base64::engine::general_purpose::STANDARD;
        let bundle = match object {
            DisplayObject::Png(bytes) => {
                MimeBundle::new().with("image/png", Value::String(engine.encode(bytes)))
            }
            DisplayObject::Jpeg(bytes) => {
                MimeBundle::new().with("image/jpeg", Value::String(engine.encode(bytes)))
            }
            DisplayObject::Svg(svg) => {
                MimeBundle::new().with("image/svg+xml", Value::String(svg.clone()))
            }
            _ => return None,
        };
        let description = match object {
            DisplayObject::Svg(svg) => format!("<image/svg+xml, {} bytes>", svg.len()),
            other => other.plain_text(),
        };
        Some(bundle.with("text/plain", Value::String(description)))
    }
}

struct BundleRenderer;

impl Renderer for BundleRenderer {
    fn render(&self, object: &DisplayObject) -> Option<MimeBundle> {
        match object {
            DisplayObject::Bundle(bundle) => Some(bundle.clone()),
            _ => None,
        }
    }
}

/// The renderers known to the kernel, keyed by the kind they handle.
#[derive(Default, Clone)]
pub struct RendererRegistry {
    renderers: HashMap<DisplayKind, Vec<Arc<dyn Renderer>>>,
}

impl RendererRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in renderers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DisplayKind::Any, Arc::new(PlainTextRenderer));
        registry.register(DisplayKind::Json, Arc::new(JsonRenderer));
        registry.register(DisplayKind::Html, Arc::new(HtmlRenderer));
        registry.register(DisplayKind::Markdown, Arc::new(MarkdownRenderer));
        registry.register(DisplayKind::Image, Arc::new(ImageRenderer));
        registry.register(DisplayKind::Bundle, Arc::new(BundleRenderer));
        registry
    }

    /// Add a renderer for a kind. Renderers registered earlier for the same
    /// kind take precedence.
    pub fn register(&mut self, kind: DisplayKind, renderer: Arc<dyn Renderer>) {
        self.renderers.entry(kind).or_default().push(renderer);
    }

    /// Render an object with every applicable renderer.
    pub fn render(&self, object: &DisplayObject) -> MimeBundle {
        let mut bundle = MimeBundle::new();
        for kind in object.kind().ancestry() {
            if let Some(renderers) = self.renderers.get(&kind) {
                for renderer in renderers {
                    if let Some(rendered) = renderer.render(object) {
                        bundle.merge_missing(rendered);
                    }
                }
            }
        }
        bundle
    }
}
