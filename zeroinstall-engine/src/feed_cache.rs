//! Feed Cache & Parser (spec.md §4.4): turns feed XML into a
//! [`zeroinstall_schema::Feed`], and keeps the on-disk cache of raw feed
//! bytes the Solver (C7) and Trust (C3) read from.
//!
//! Reads are tolerant: a corrupt or unparsable cache entry is logged and
//! treated as absent rather than propagated, so one bad file never blocks
//! a solve that doesn't need it. Writes are not — [`FeedCache::add`]
//! surfaces every I/O and validation error it hits.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use data_encoding::HEXLOWER;
use fs2::FileExt;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use zeroinstall_schema::feed::{
    Archive, Binding, Command, Dependency, Element, EnvironmentMode, ExternalRetrievalMethod,
    Group, GroupDefaults, Icon, Importance, Localized, Recipe, RecipeStep, Restriction, Runner,
    SingleFile,
};
use zeroinstall_schema::{
    Architecture, Feed, FeedUri, Implementation, ManifestDigest, ManifestFormat, RetrievalMethod,
    Stability, VersionRange,
};

use crate::errors::{EngineError, Result};

/// Filenames longer than this fall back to a hashed alternate name
/// (spec.md §4.4): most filesystems cap a single path component around
/// 255 bytes, and an escaped URI with a long query string can exceed
/// that comfortably.
const MAX_NAME_LEN: usize = 200;

/// The on-disk cache of fetched feed documents, one file per feed
/// (spec.md §6 "Persisted state layout": `<feeds_dir>/<escaped_uri>`).
pub struct FeedCache {
    dir: Utf8PathBuf,
}

impl FeedCache {
    /// Open a cache rooted at `dir`, creating nothing yet — directories
    /// are created lazily on first [`FeedCache::add`].
    pub fn new(dir: Utf8PathBuf) -> Self {
        FeedCache { dir }
    }

    fn direct_path(&self, uri: &FeedUri) -> Utf8PathBuf {
        self.dir.join(uri.escaped())
    }

    fn overflow_path(&self, uri: &FeedUri) -> Utf8PathBuf {
        let hash = HEXLOWER.encode(&Sha256::digest(uri.as_str().as_bytes()));
        self.dir.join(format!("overflow-{hash}"))
    }

    fn overflow_index_path(&self) -> Utf8PathBuf {
        self.dir.join("_overflow_index")
    }

    /// The path a feed is actually stored at: direct escaped name, or the
    /// hashed alternate once that name would be too long for the host
    /// filesystem.
    fn target_path(&self, uri: &FeedUri) -> Utf8PathBuf {
        let escaped = uri.escaped();
        if escaped.len() <= MAX_NAME_LEN {
            self.dir.join(escaped)
        } else {
            self.overflow_path(uri)
        }
    }

    fn record_overflow(&self, uri: &FeedUri) -> Result<()> {
        let index_path = self.overflow_index_path();
        let hash_name = self
            .overflow_path(uri)
            .file_name()
            .map(str::to_owned)
            .unwrap_or_default();
        let line = format!("{hash_name}\t{}", uri.as_str());

        let existing = fs::read_to_string(index_path.as_std_path()).unwrap_or_default();
        if existing.lines().any(|l| l == line) {
            return Ok(());
        }
        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&line);
        updated.push('\n');

        let tmp = index_path.with_extension("tmp");
        fs::write(&tmp, &updated).map_err(|e| EngineError::io(&tmp, e))?;
        fs::rename(&tmp, &index_path).map_err(|e| EngineError::io(&index_path, e))?;
        Ok(())
    }

    fn read_bytes(&self, uri: &FeedUri) -> Result<Option<Vec<u8>>> {
        let path = self.target_path(uri);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&path).map_err(|e| EngineError::io(&path, e))?))
    }

    /// True if a feed is cached for `uri`, without reading or parsing it.
    /// A local feed (`file:` URI or bare absolute path) is also considered
    /// present when the path it names exists on disk, since those are
    /// read directly rather than fetched into the cache (spec.md §4.4).
    pub fn contains(&self, uri: &FeedUri) -> bool {
        if self.target_path(uri).exists() {
            return true;
        }
        if uri.is_local() {
            if let Some(path) = local_feed_path(uri) {
                return path.exists();
            }
        }
        false
    }

    /// Load and parse the cached feed for `uri`. Returns `None` on any
    /// I/O or parse failure, logging it — callers treat this exactly like
    /// a cache miss, per spec.md §4.4's tolerant-read rule.
    pub fn get_feed(&self, uri: &FeedUri) -> Option<Feed> {
        let bytes = match self.read_bytes(uri) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(error) => {
                warn!(%uri, %error, "failed to read cached feed");
                return None;
            }
        };
        match parse_feed(&bytes) {
            Ok(mut feed) => {
                feed.uri = uri.clone();
                Some(feed)
            }
            Err(error) => {
                warn!(%uri, %error, "failed to parse cached feed");
                None
            }
        }
    }

    /// The raw detached-signature bytes trailing the cached feed, if any
    /// (spec.md §4.3 step 1, delegated to [`crate::trust::split_signature_block`]).
    pub fn get_signatures(&self, uri: &FeedUri) -> Result<Option<Vec<u8>>> {
        match self.read_bytes(uri)? {
            Some(bytes) => Ok(crate::trust::split_signature_block(&bytes)?.map(|(_, sig)| sig)),
            None => Ok(None),
        }
    }

    /// Store `bytes` (the exact bytes fetched, signature trailer
    /// included) as the cache entry for `uri`. Rejects bytes whose parsed
    /// `<interface uri=...>` disagrees with `uri` — a feed never gets
    /// filed under the wrong name. Writes atomically via temp file +
    /// rename, the same discipline [`crate::config::Config::save`] uses.
    pub fn add(&self, uri: &FeedUri, bytes: Vec<u8>) -> Result<()> {
        let parsed = parse_feed(&bytes)?;
        if !parsed.uri.as_str().is_empty() && parsed.uri.as_str() != uri.as_str() {
            return Err(EngineError::ParseError {
                what: uri.to_string(),
                detail: format!(
                    "feed declares uri {} but was fetched as {uri}",
                    parsed.uri
                ),
            });
        }

        fs::create_dir_all(&self.dir).map_err(|e| EngineError::io(&self.dir, e))?;
        let lock_path = self.lock_path();
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_path.as_std_path())
            .map_err(|e| EngineError::io(&lock_path, e))?;
        lock_file.lock_exclusive().map_err(|e| EngineError::io(&lock_path, e))?;

        let path = self.target_path(uri);
        let is_overflow = path != self.direct_path(uri);
        let tmp = path.with_extension("tmp");
        let result = (|| {
            fs::write(&tmp, &bytes).map_err(|e| EngineError::io(&tmp, e))?;
            fs::rename(&tmp, &path).map_err(|e| EngineError::io(&path, e))?;
            if is_overflow {
                self.record_overflow(uri)?;
            }
            Ok(())
        })();

        let _ = lock_file.unlock();
        result?;
        debug!(%uri, bytes = bytes.len(), "cached feed");
        Ok(())
    }

    /// Path to the process-wide advisory lock held for the duration of a
    /// write, so two processes fetching the same feed at once don't race
    /// on the temp-file-then-rename sequence (spec.md §5).
    fn lock_path(&self) -> Utf8PathBuf {
        self.dir.join(".lock")
    }

    /// Remove a cached feed, if present. Not an error if it wasn't.
    pub fn remove(&self, uri: &FeedUri) -> Result<()> {
        let path = self.target_path(uri);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| EngineError::io(&path, e))?;
        }
        Ok(())
    }

    /// Every feed URI currently cached, direct and overflow entries both.
    pub fn list_all(&self) -> Result<Vec<FeedUri>> {
        let mut out = Vec::new();
        if !self.dir.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(self.dir.as_std_path()).map_err(|e| EngineError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| EngineError::io(&self.dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == "_overflow_index" || name.ends_with(".tmp") || name.starts_with("overflow-") {
                continue;
            }
            if let Some(uri) = FeedUri::unescape(&name) {
                out.push(uri);
            }
        }
        if let Ok(contents) = fs::read_to_string(self.overflow_index_path().as_std_path()) {
            for line in contents.lines() {
                if let Some((_, uri)) = line.split_once('\t') {
                    out.push(FeedUri::new(uri.to_owned()));
                }
            }
        }
        Ok(out)
    }
}

// --- XML parsing -----------------------------------------------------
//
// Two passes: first build a generic, namespace-blind tree of
// tag/attrs/children/text, then walk that tree into the typed `Feed`
// model. Keeping the quick-xml event loop isolated to one small function
// means the rest of this module reads like ordinary tree-shaped data
// wrangling instead of a streaming state machine.

struct XmlNode {
    tag: String,
    attrs: BTreeMap<String, String>,
    children: Vec<XmlNode>,
    text: String,
}

/// The filesystem path a local feed URI names, stripping the `file://` or
/// `file:` scheme when present. `None` for anything that isn't a local URI.
fn local_feed_path(uri: &FeedUri) -> Option<Utf8PathBuf> {
    let s = uri.as_str();
    let path = s.strip_prefix("file://").or_else(|| s.strip_prefix("file:")).unwrap_or(s);
    if path.is_empty() {
        None
    } else {
        Some(Utf8PathBuf::from(path))
    }
}

fn parse_err(detail: impl Into<String>) -> EngineError {
    EngineError::ParseError {
        what: "feed XML".into(),
        detail: detail.into(),
    }
}

fn xml_err(e: impl std::fmt::Display) -> EngineError {
    parse_err(e.to_string())
}

fn local_tag_name(e: &BytesStart) -> String {
    let raw = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    raw.rsplit(':').next().unwrap_or(&raw).to_owned()
}

fn parse_attrs(e: &BytesStart) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn parse_xml_tree(bytes: &[u8]) -> Result<XmlNode> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                let tag = local_tag_name(&e);
                let attrs = parse_attrs(&e)?;
                buf.clear();
                return parse_xml_children(&mut reader, &mut buf, tag, attrs);
            }
            Event::Empty(e) => {
                let tag = local_tag_name(&e);
                let attrs = parse_attrs(&e)?;
                return Ok(XmlNode {
                    tag,
                    attrs,
                    children: Vec::new(),
                    text: String::new(),
                });
            }
            Event::Eof => return Err(parse_err("no root element found")),
            _ => {}
        }
        buf.clear();
    }
}

fn parse_xml_children(
    reader: &mut Reader<&[u8]>,
    buf: &mut Vec<u8>,
    tag: String,
    attrs: BTreeMap<String, String>,
) -> Result<XmlNode> {
    let mut children = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(buf).map_err(xml_err)? {
            Event::Start(e) => {
                let child_tag = local_tag_name(&e);
                let child_attrs = parse_attrs(&e)?;
                buf.clear();
                children.push(parse_xml_children(reader, buf, child_tag, child_attrs)?);
            }
            Event::Empty(e) => {
                let child_tag = local_tag_name(&e);
                let child_attrs = parse_attrs(&e)?;
                children.push(XmlNode {
                    tag: child_tag,
                    attrs: child_attrs,
                    children: Vec::new(),
                    text: String::new(),
                });
                buf.clear();
            }
            Event::Text(e) => {
                text.push_str(&e.unescape().map_err(xml_err)?);
                buf.clear();
            }
            Event::CData(e) => {
                text.push_str(&String::from_utf8_lossy(e.as_ref()));
                buf.clear();
            }
            Event::End(_) => {
                buf.clear();
                break;
            }
            Event::Eof => return Err(parse_err(format!("unexpected end of document inside <{tag}>"))),
            _ => {
                buf.clear();
            }
        }
    }
    Ok(XmlNode { tag, attrs, children, text })
}

fn get_attr<'a>(node: &'a XmlNode, name: &str) -> Option<&'a str> {
    node.attrs.get(name).map(String::as_str)
}

fn require_attr<'a>(node: &'a XmlNode, name: &str) -> Result<&'a str> {
    get_attr(node, name).ok_or_else(|| parse_err(format!("<{}> missing required '{name}' attribute", node.tag)))
}

fn text_of(node: &XmlNode) -> String {
    node.text.trim().to_owned()
}

fn space_separated(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_owned).collect()
}

fn parse_stability(s: &str) -> Option<Stability> {
    match s {
        "insecure" => Some(Stability::Insecure),
        "buggy" => Some(Stability::Buggy),
        "developer" => Some(Stability::Developer),
        "testing" => Some(Stability::Testing),
        "stable" => Some(Stability::Stable),
        "packaged" => Some(Stability::Packaged),
        "preferred" => Some(Stability::Preferred),
        _ => None,
    }
}

/// Parse a complete feed document (spec.md §4.4, §6). The root element
/// must be named `interface`; everything else is tolerant of unknown
/// child elements, which are simply skipped, matching real-world feeds
/// that carry extension elements this engine doesn't understand.
pub fn parse_feed(bytes: &[u8]) -> Result<Feed> {
    let root = parse_xml_tree(bytes)?;
    if root.tag != "interface" {
        return Err(parse_err(format!("expected <interface> root element, found <{}>", root.tag)));
    }
    build_feed(&root)
}

fn build_feed(root: &XmlNode) -> Result<Feed> {
    let mut feed = Feed {
        uri: get_attr(root, "uri").map(|s| FeedUri::new(s.to_owned())).unwrap_or_else(|| FeedUri::new(String::new())),
        ..Feed::default()
    };

    for child in &root.children {
        match child.tag.as_str() {
            "name" => feed.name = text_of(child),
            "summary" => feed.summaries.push(parse_localized(child)),
            "description" => feed.descriptions.push(parse_localized(child)),
            "homepage" => feed.homepage = Some(text_of(child)),
            "icon" => feed.icons.push(Icon {
                href: require_attr(child, "href")?.to_owned(),
                mime_type: get_attr(child, "type").map(str::to_owned),
            }),
            "category" => {
                feed.categories.insert(text_of(child));
            }
            "feed-for" => {
                feed.feed_for.insert(FeedUri::new(require_attr(child, "interface")?.to_owned()));
            }
            "feed" => feed.feeds.push(FeedUri::new(require_attr(child, "src")?.to_owned())),
            "needs-terminal" => feed.needs_terminal = true,
            "group" => feed.elements.push(Element::Group(parse_group(child)?)),
            "implementation" => feed.elements.push(Element::Implementation(parse_implementation(child)?)),
            "package-implementation" => {
                feed.elements.push(Element::Implementation(parse_package_implementation(child)?));
            }
            _ => {}
        }
    }

    Ok(feed)
}

fn parse_localized(node: &XmlNode) -> Localized {
    Localized {
        lang: get_attr(node, "xml:lang").unwrap_or_default().to_owned(),
        text: text_of(node),
    }
}

fn parse_group(node: &XmlNode) -> Result<Group> {
    let defaults = parse_group_defaults(node)?;
    let mut elements = Vec::new();
    for child in &node.children {
        match child.tag.as_str() {
            "group" => elements.push(Element::Group(parse_group(child)?)),
            "implementation" => elements.push(Element::Implementation(parse_implementation(child)?)),
            "package-implementation" => {
                elements.push(Element::Implementation(parse_package_implementation(child)?));
            }
            _ => {}
        }
    }
    Ok(Group { defaults, elements })
}

fn parse_group_defaults(node: &XmlNode) -> Result<GroupDefaults> {
    let architecture = get_attr(node, "arch").and_then(Architecture::parse);
    let stability = get_attr(node, "stability").and_then(parse_stability);
    let languages = get_attr(node, "langs").map(space_separated).unwrap_or_default();
    let version_prefix = get_attr(node, "version").map(str::to_owned);
    let license = get_attr(node, "license").map(str::to_owned);
    let (commands, dependencies, restrictions, bindings) = parse_common_children(node)?;
    Ok(GroupDefaults {
        architecture,
        stability,
        version_prefix,
        license,
        commands,
        dependencies,
        restrictions,
        bindings,
        languages,
    })
}

/// Parse the `<command>`/`<requires>`/`<recommends>`/`<restricts>`/
/// binding children shared by `<group>`, `<implementation>` and
/// `<command>` itself.
fn parse_common_children(
    node: &XmlNode,
) -> Result<(BTreeMap<String, Command>, Vec<Dependency>, Vec<Restriction>, Vec<Binding>)> {
    let mut commands = BTreeMap::new();
    let mut dependencies = Vec::new();
    let mut restrictions = Vec::new();
    let mut bindings = Vec::new();
    for child in &node.children {
        match child.tag.as_str() {
            "command" => {
                let command = parse_command(child)?;
                commands.insert(command.name.clone(), command);
            }
            "requires" => dependencies.push(parse_dependency(child, Importance::Essential)?),
            "recommends" => dependencies.push(parse_dependency(child, Importance::Recommended)?),
            "restricts" => restrictions.push(parse_restriction(child)?),
            "environment" | "executable-in-var" | "executable-in-path" | "overlay" => {
                if let Some(binding) = parse_binding(child)? {
                    bindings.push(binding);
                }
            }
            _ => {}
        }
    }
    Ok((commands, dependencies, restrictions, bindings))
}

fn parse_implementation(node: &XmlNode) -> Result<Implementation> {
    let id = require_attr(node, "id")?.to_owned();
    let version_str = require_attr(node, "version")?;
    let version = zeroinstall_schema::ImplementationVersion::parse(version_str)
        .ok_or_else(|| parse_err(format!("invalid version '{version_str}' on implementation {id}")))?;
    let released = get_attr(node, "released").map(str::to_owned);
    let architecture = get_attr(node, "arch").and_then(Architecture::parse);
    let languages = get_attr(node, "langs").map(space_separated).unwrap_or_default();
    let stability = get_attr(node, "stability").and_then(parse_stability).unwrap_or(Stability::Unset);
    let manifest_digest = parse_manifest_digest(node, &id);
    let retrieval_methods = parse_retrieval_methods(node)?;
    let (commands, dependencies, restrictions, bindings) = parse_common_children(node)?;
    let local_path = get_attr(node, "local-path").map(Utf8PathBuf::from);
    let is_source = architecture
        .as_ref()
        .map(|a| a.cpu == zeroinstall_schema::Cpu::Src)
        .unwrap_or(false);

    Ok(Implementation {
        id,
        version,
        released,
        architecture,
        languages,
        stability,
        manifest_digest,
        retrieval_methods,
        commands,
        dependencies,
        restrictions,
        bindings,
        local_path,
        is_source,
    })
}

/// A `<package-implementation>` never names its own digest or retrieval
/// archive — it defers entirely to the native package provider at fetch
/// time (spec.md §4.6 step 2), so it's represented as an `Implementation`
/// whose sole retrieval method is [`RetrievalMethod::External`].
fn parse_package_implementation(node: &XmlNode) -> Result<Implementation> {
    let package = require_attr(node, "package")?.to_owned();
    let distributions = get_attr(node, "distributions").map(space_separated).unwrap_or_default();
    let (commands, dependencies, restrictions, bindings) = parse_common_children(node)?;

    Ok(Implementation {
        id: format!("package:{package}"),
        version: zeroinstall_schema::ImplementationVersion::parse("0").expect("'0' is always a valid version"),
        released: None,
        architecture: None,
        languages: Vec::new(),
        stability: Stability::Packaged,
        manifest_digest: ManifestDigest::new(),
        retrieval_methods: vec![RetrievalMethod::External(ExternalRetrievalMethod { package, distributions })],
        commands,
        dependencies,
        restrictions,
        bindings,
        local_path: None,
        is_source: false,
    })
}

fn parse_manifest_digest(node: &XmlNode, id: &str) -> ManifestDigest {
    let mut digest = ManifestDigest::new();
    for (attr_name, format) in [
        ("sha1new", ManifestFormat::Sha1New),
        ("sha256", ManifestFormat::Sha256),
        ("sha256new", ManifestFormat::Sha256New),
    ] {
        if let Some(value) = get_attr(node, attr_name) {
            digest.insert(format, value.to_owned());
        }
    }
    for child in &node.children {
        if child.tag == "manifest-digest" {
            for (key, value) in &child.attrs {
                if let Some(format) = ManifestFormat::parse(key) {
                    digest.insert(format, value.clone());
                }
            }
        }
    }
    if digest.best().is_none() {
        if let Some((format, raw)) = ManifestDigest::parse_store_name(id) {
            digest.insert(format, raw.to_owned());
        }
    }
    digest
}

fn parse_retrieval_methods(node: &XmlNode) -> Result<Vec<RetrievalMethod>> {
    let mut methods = Vec::new();
    for child in &node.children {
        match child.tag.as_str() {
            "archive" => methods.push(RetrievalMethod::Archive(parse_archive(child)?)),
            "file" => methods.push(RetrievalMethod::SingleFile(parse_single_file(child)?)),
            "recipe" => methods.push(RetrievalMethod::Recipe(parse_recipe(child)?)),
            _ => {}
        }
    }
    Ok(methods)
}

fn parse_archive(node: &XmlNode) -> Result<Archive> {
    Ok(Archive {
        href: require_attr(node, "href")?.to_owned(),
        mime_type: get_attr(node, "type").map(str::to_owned),
        size: get_attr(node, "size").and_then(|s| s.parse().ok()).unwrap_or(0),
        extract: get_attr(node, "extract").map(str::to_owned),
        destination: get_attr(node, "dest").map(Utf8PathBuf::from),
        start_offset: get_attr(node, "start-offset").and_then(|s| s.parse().ok()).unwrap_or(0),
    })
}

fn parse_single_file(node: &XmlNode) -> Result<SingleFile> {
    Ok(SingleFile {
        href: require_attr(node, "href")?.to_owned(),
        size: get_attr(node, "size").and_then(|s| s.parse().ok()).unwrap_or(0),
        destination: Utf8PathBuf::from(require_attr(node, "dest")?),
        executable: matches!(get_attr(node, "executable"), Some("true") | Some("1")),
    })
}

fn parse_recipe(node: &XmlNode) -> Result<Recipe> {
    let mut steps = Vec::new();
    for child in &node.children {
        match child.tag.as_str() {
            "archive" => steps.push(RecipeStep::Archive(parse_archive(child)?)),
            "file" => steps.push(RecipeStep::File(parse_single_file(child)?)),
            "rename" => steps.push(RecipeStep::Rename {
                source: Utf8PathBuf::from(require_attr(child, "source")?),
                dest: Utf8PathBuf::from(require_attr(child, "dest")?),
            }),
            "remove" => steps.push(RecipeStep::Remove {
                path: Utf8PathBuf::from(require_attr(child, "path")?),
            }),
            "copy-from" => steps.push(RecipeStep::CopyFrom {
                id: require_attr(child, "id")?.to_owned(),
                source: Utf8PathBuf::from(get_attr(child, "source").unwrap_or(".")),
                dest: Utf8PathBuf::from(get_attr(child, "dest").unwrap_or(".")),
            }),
            _ => {}
        }
    }
    Ok(Recipe { steps })
}

fn parse_command(node: &XmlNode) -> Result<Command> {
    let name = require_attr(node, "name")?.to_owned();
    let path = get_attr(node, "path").map(Utf8PathBuf::from);
    let mut arguments = Vec::new();
    let mut runner = None;
    let mut dependencies = Vec::new();
    let mut bindings = Vec::new();
    for child in &node.children {
        match child.tag.as_str() {
            "arg" => arguments.push(text_of(child)),
            "runner" => runner = Some(Box::new(parse_runner(child)?)),
            "requires" => dependencies.push(parse_dependency(child, Importance::Essential)?),
            "recommends" => dependencies.push(parse_dependency(child, Importance::Recommended)?),
            "environment" | "executable-in-var" | "executable-in-path" | "overlay" => {
                if let Some(binding) = parse_binding(child)? {
                    bindings.push(binding);
                }
            }
            _ => {}
        }
    }
    Ok(Command { name, path, arguments, runner, dependencies, bindings })
}

fn parse_runner(node: &XmlNode) -> Result<Runner> {
    let interface = FeedUri::new(require_attr(node, "interface")?.to_owned());
    let command = get_attr(node, "command").unwrap_or("run").to_owned();
    let mut arguments = Vec::new();
    for child in &node.children {
        if child.tag == "arg" {
            arguments.push(text_of(child));
        }
    }
    let versions = get_attr(node, "version").and_then(VersionRange::parse_range_expr);
    Ok(Runner { interface, command, arguments, versions })
}

fn parse_dependency(node: &XmlNode, importance: Importance) -> Result<Dependency> {
    let restriction = parse_restriction(node)?;
    let mut bindings = Vec::new();
    for child in &node.children {
        if let Some(binding) = parse_binding(child)? {
            bindings.push(binding);
        }
    }
    Ok(Dependency { importance, restriction, bindings })
}

fn parse_restriction(node: &XmlNode) -> Result<Restriction> {
    Ok(Restriction {
        interface: FeedUri::new(require_attr(node, "interface")?.to_owned()),
        versions: get_attr(node, "version").and_then(VersionRange::parse_range_expr),
        os: get_attr(node, "os").map(str::to_owned),
        distributions: get_attr(node, "distributions").map(space_separated).unwrap_or_default(),
    })
}

fn parse_binding(node: &XmlNode) -> Result<Option<Binding>> {
    match node.tag.as_str() {
        "environment" => Ok(Some(Binding::Environment {
            name: require_attr(node, "name")?.to_owned(),
            insert: get_attr(node, "insert").map(Utf8PathBuf::from),
            value: get_attr(node, "value").map(str::to_owned),
            mode: match get_attr(node, "mode") {
                Some("replace") => EnvironmentMode::Replace,
                Some("append") => EnvironmentMode::Append,
                _ => EnvironmentMode::Prepend,
            },
            separator: get_attr(node, "separator").map(str::to_owned),
            default: get_attr(node, "default").map(str::to_owned),
        })),
        "executable-in-var" => Ok(Some(Binding::ExecutableInVar {
            name: require_attr(node, "name")?.to_owned(),
            command: get_attr(node, "command").unwrap_or("run").to_owned(),
        })),
        "executable-in-path" => Ok(Some(Binding::ExecutableInPath {
            name: require_attr(node, "name")?.to_owned(),
            command: get_attr(node, "command").unwrap_or("run").to_owned(),
        })),
        "overlay" => Ok(Some(Binding::Overlay {
            src: get_attr(node, "src").map(Utf8PathBuf::from),
            mount_point: Utf8PathBuf::from(get_attr(node, "mount-point").unwrap_or("/")),
        })),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_feed(uri: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" ?>
<interface uri="{uri}">
  <name>Sample App</name>
  <summary xml:lang="en">does stuff</summary>
  <implementation id="sha256new_abc" version="1.0" arch="Linux-x86_64" stability="stable">
    <manifest-digest sha256new="abc"/>
    <archive href="http://example.com/app-1.0.tar.gz" size="1024"/>
  </implementation>
</interface>
"#
        )
        .into_bytes()
    }

    #[test]
    fn parse_feed_reads_name_and_implementation() {
        let bytes = sample_feed("http://example.com/app.xml");
        let feed = parse_feed(&bytes).unwrap();
        assert_eq!(feed.name, "Sample App");
        assert_eq!(feed.summaries[0].text, "does stuff");
        let impls = feed.flatten_implementations();
        assert_eq!(impls.len(), 1);
        assert_eq!(impls[0].id, "sha256new_abc");
        assert_eq!(impls[0].manifest_digest.get(ManifestFormat::Sha256New), Some("abc"));
        assert_eq!(impls[0].retrieval_methods.len(), 1);
    }

    #[test]
    fn add_then_get_feed_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let uri = FeedUri::new("http://example.com/app.xml".to_owned());
        cache.add(&uri, sample_feed(uri.as_str())).unwrap();

        assert!(cache.contains(&uri));
        let feed = cache.get_feed(&uri).unwrap();
        assert_eq!(feed.name, "Sample App");
        assert_eq!(feed.uri, uri);
    }

    #[test]
    fn add_creates_and_releases_the_advisory_lock() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let uri = FeedUri::new("http://example.com/app.xml".to_owned());
        cache.add(&uri, sample_feed(uri.as_str())).unwrap();

        assert!(cache.lock_path().exists());
        let lock_file = fs::OpenOptions::new()
            .write(true)
            .open(cache.lock_path().as_std_path())
            .unwrap();
        lock_file.try_lock_exclusive().expect("lock must be released after add() returns");
    }

    #[test]
    fn add_rejects_mismatched_uri() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let target = FeedUri::new("http://example.com/other.xml".to_owned());
        let err = cache
            .add(&target, sample_feed("http://example.com/app.xml"))
            .unwrap_err();
        assert!(matches!(err, EngineError::ParseError { .. }));
    }

    #[test]
    fn get_feed_returns_none_for_malformed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let uri = FeedUri::new("http://example.com/broken.xml".to_owned());
        let path = cache.direct_path(&uri);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not even xml <<<").unwrap();

        assert!(cache.get_feed(&uri).is_none());
    }

    #[test]
    fn contains_treats_an_existing_local_feed_file_as_present() {
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::new(Utf8PathBuf::from_path_buf(cache_dir.path().to_path_buf()).unwrap());

        let feed_dir = tempfile::tempdir().unwrap();
        let feed_path = Utf8PathBuf::from_path_buf(feed_dir.path().join("app.xml")).unwrap();
        fs::write(&feed_path, sample_feed(feed_path.as_str())).unwrap();
        let uri = FeedUri::new(feed_path.to_string());

        assert!(cache.contains(&uri));
    }

    #[test]
    fn contains_is_false_for_a_missing_local_feed_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let uri = FeedUri::new("/does/not/exist/app.xml".to_owned());
        assert!(!cache.contains(&uri));
    }

    #[test]
    fn list_all_finds_added_feeds() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let a = FeedUri::new("http://example.com/a.xml".to_owned());
        let b = FeedUri::new("http://example.com/b.xml".to_owned());
        cache.add(&a, sample_feed(a.as_str())).unwrap();
        cache.add(&b, sample_feed(b.as_str())).unwrap();

        let mut all = cache.list_all().unwrap();
        all.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        assert_eq!(all, vec![a, b]);
    }

    #[test]
    fn overflow_path_used_for_long_uris() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FeedCache::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let long_uri = format!("http://example.com/{}", "x".repeat(300));
        let uri = FeedUri::new(long_uri.clone());
        cache.add(&uri, sample_feed(&long_uri)).unwrap();

        assert!(cache.contains(&uri));
        assert_eq!(cache.get_feed(&uri).unwrap().name, "Sample App");
        assert!(cache.list_all().unwrap().contains(&uri));
    }
}
