//! Solver output (spec.md §3, §4.8).

use std::collections::BTreeMap;

use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Reader;
use quick_xml::Writer;
use serde::{Deserialize, Serialize};

use crate::arch::{Architecture, Stability};
use crate::digest::{ManifestDigest, ManifestFormat};
use crate::feed::{Binding, Command, Dependency, EnvironmentMode, Importance, Restriction, Runner};
use crate::uri::FeedUri;
use crate::version::{ImplementationVersion, VersionRange};

/// One implementation chosen by the Solver for a single interface.
/// Same shape as [`crate::feed::Implementation`], plus `from_feed`
/// recording which feed document it was actually read from (the
/// interface it satisfies — `interface_uri` below — may differ, e.g. a
/// `feed-for` add-on feed).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationSelection {
    /// The interface this selection satisfies.
    pub interface_uri: FeedUri,
    /// The feed the selected implementation was actually read from.
    pub from_feed: FeedUri,
    /// Opaque implementation identifier.
    pub id: String,
    /// The selected version.
    pub version: ImplementationVersion,
    /// The implementation's own architecture (after group defaults were
    /// applied by the solver).
    pub architecture: Option<Architecture>,
    /// The implementation's stability rating.
    pub stability: Stability,
    /// Content digests identifying the on-disk directory.
    pub manifest_digest: ManifestDigest,
    /// The command resolved on this selection, if the solve requested
    /// one for this interface.
    pub command: Option<Command>,
    /// Dependencies that were themselves solved to reach this selection.
    pub dependencies: Vec<Dependency>,
    /// Restrictions this selection imposes on the rest of the solve.
    pub restrictions: Vec<Restriction>,
    /// Bindings granted by this selection.
    pub bindings: Vec<Binding>,
    /// Local directory override, if this selection bypassed the store.
    pub local_path: Option<camino::Utf8PathBuf>,
}

/// The Solver's output (spec.md §3): one selection per interface reached
/// from the root requirements, topologically sorted so that a selection
/// appears before any that depend on it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selections {
    /// The root interface that was solved.
    pub interface_uri: Option<FeedUri>,
    /// The command resolved on the root interface.
    pub command: Option<String>,
    /// Chosen implementations, topologically sorted.
    pub implementations: Vec<ImplementationSelection>,
}

impl Selections {
    /// The selection satisfying `interface`, if any.
    pub fn get(&self, interface: &FeedUri) -> Option<&ImplementationSelection> {
        self.implementations
            .iter()
            .find(|selection| &selection.interface_uri == interface)
    }
}

/// One line of [`Selections::diff`] (spec.md §4.8 `get_diff`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SelectionsDiff {
    /// `interface` appears in the new selections but not the old.
    Added {
        /// The newly solved interface.
        interface: FeedUri,
    },
    /// `interface` appeared in the old selections but not the new.
    Removed {
        /// The interface that's no longer part of the solve.
        interface: FeedUri,
    },
    /// `interface` is present in both but at different versions.
    VersionChanged {
        /// The interface whose selection changed.
        interface: FeedUri,
        /// Its previously selected version.
        old: ImplementationVersion,
        /// Its newly selected version.
        new: ImplementationVersion,
    },
}

impl Selections {
    /// Compare two solves, reporting per-interface additions, removals,
    /// and version changes (spec.md §4.8).
    pub fn diff(old: &Selections, new: &Selections) -> Vec<SelectionsDiff> {
        let mut out = Vec::new();
        for new_sel in &new.implementations {
            match old.get(&new_sel.interface_uri) {
                None => out.push(SelectionsDiff::Added {
                    interface: new_sel.interface_uri.clone(),
                }),
                Some(old_sel) if old_sel.version != new_sel.version => {
                    out.push(SelectionsDiff::VersionChanged {
                        interface: new_sel.interface_uri.clone(),
                        old: old_sel.version.clone(),
                        new: new_sel.version.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        for old_sel in &old.implementations {
            if new.get(&old_sel.interface_uri).is_none() {
                out.push(SelectionsDiff::Removed {
                    interface: old_sel.interface_uri.clone(),
                });
            }
        }
        out
    }
}

/// A `<selections>` document couldn't be parsed back.
#[derive(Debug, thiserror::Error)]
#[error("malformed selections document: {0}")]
pub struct SelectionsXmlError(String);

const WRITE_INFALLIBLE: &str = "writing XML events to an in-memory Vec<u8> cannot fail";

fn push_attr(elem: &mut BytesStart, key: &str, value: &str) {
    elem.push_attribute((key, escape(value).as_ref()));
}

impl Selections {
    /// Serialize as a `<selections interface= command=>` document with one
    /// `<selection from-feed=>` child per chosen implementation.
    pub fn to_xml(&self) -> String {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        let mut root = BytesStart::new("selections");
        if let Some(interface) = &self.interface_uri {
            push_attr(&mut root, "interface", interface.as_str());
        }
        if let Some(command) = &self.command {
            push_attr(&mut root, "command", command);
        }
        writer.write_event(Event::Start(root)).expect(WRITE_INFALLIBLE);
        for selection in &self.implementations {
            selection.write_xml(&mut writer);
        }
        writer
            .write_event(Event::End(BytesEnd::new("selections")))
            .expect(WRITE_INFALLIBLE);
        String::from_utf8(writer.into_inner()).expect("quick-xml only emits valid UTF-8")
    }

    /// Parse a document produced by [`Selections::to_xml`].
    pub fn from_xml(xml: &str) -> Result<Selections, SelectionsXmlError> {
        let root = parse_xml_tree(xml.as_bytes())?;
        if root.tag != "selections" {
            return Err(SelectionsXmlError(format!(
                "expected <selections> root element, found <{}>",
                root.tag
            )));
        }
        let interface_uri = get_attr(&root, "interface").map(|s| FeedUri::new(s.to_owned()));
        let command = get_attr(&root, "command").map(str::to_owned);
        let mut implementations = Vec::new();
        for child in &root.children {
            if child.tag == "selection" {
                implementations.push(ImplementationSelection::from_node(child)?);
            }
        }
        Ok(Selections { interface_uri, command, implementations })
    }
}

impl ImplementationSelection {
    fn write_xml(&self, writer: &mut Writer<Vec<u8>>) {
        let mut elem = BytesStart::new("selection");
        push_attr(&mut elem, "interface", self.interface_uri.as_str());
        push_attr(&mut elem, "from-feed", self.from_feed.as_str());
        push_attr(&mut elem, "id", &self.id);
        push_attr(&mut elem, "version", &self.version.to_string());
        if let Some(arch) = &self.architecture {
            push_attr(&mut elem, "arch", &arch.to_string());
        }
        push_attr(&mut elem, "stability", &self.stability.to_string());
        if let Some(local_path) = &self.local_path {
            push_attr(&mut elem, "local-path", local_path.as_str());
        }
        for (format, digest) in self.manifest_digest.iter() {
            push_attr(&mut elem, format.algorithm_name(), digest);
        }
        writer.write_event(Event::Start(elem)).expect(WRITE_INFALLIBLE);

        if let Some(command) = &self.command {
            write_command(writer, command);
        }
        for dependency in &self.dependencies {
            write_dependency(writer, dependency);
        }
        for restriction in &self.restrictions {
            write_restriction(writer, "restricts", restriction);
        }
        for binding in &self.bindings {
            write_binding(writer, binding);
        }

        writer
            .write_event(Event::End(BytesEnd::new("selection")))
            .expect(WRITE_INFALLIBLE);
    }

    fn from_node(node: &XmlNode) -> Result<ImplementationSelection, SelectionsXmlError> {
        let version_str = require_attr(node, "version")?;
        let version = ImplementationVersion::parse(version_str)
            .ok_or_else(|| SelectionsXmlError(format!("invalid version {version_str:?} on selection")))?;
        let mut command = None;
        let mut dependencies = Vec::new();
        let mut restrictions = Vec::new();
        let mut bindings = Vec::new();
        for child in &node.children {
            match child.tag.as_str() {
                "command" => command = Some(parse_command(child)?),
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
        Ok(ImplementationSelection {
            interface_uri: FeedUri::new(require_attr(node, "interface")?.to_owned()),
            from_feed: FeedUri::new(require_attr(node, "from-feed")?.to_owned()),
            id: require_attr(node, "id")?.to_owned(),
            version,
            architecture: get_attr(node, "arch").and_then(Architecture::parse),
            stability: get_attr(node, "stability").and_then(Stability::parse).unwrap_or(Stability::Unset),
            manifest_digest: parse_manifest_digest(node),
            command,
            dependencies,
            restrictions,
            bindings,
            local_path: get_attr(node, "local-path").map(camino::Utf8PathBuf::from),
        })
    }
}

fn parse_manifest_digest(node: &XmlNode) -> ManifestDigest {
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
    digest
}

fn write_command(writer: &mut Writer<Vec<u8>>, command: &Command) {
    let mut elem = BytesStart::new("command");
    push_attr(&mut elem, "name", &command.name);
    if let Some(path) = &command.path {
        push_attr(&mut elem, "path", path.as_str());
    }
    writer.write_event(Event::Start(elem)).expect(WRITE_INFALLIBLE);
    for arg in &command.arguments {
        write_text_element(writer, "arg", arg);
    }
    if let Some(runner) = &command.runner {
        write_runner(writer, runner);
    }
    for dependency in &command.dependencies {
        write_dependency(writer, dependency);
    }
    for binding in &command.bindings {
        write_binding(writer, binding);
    }
    writer
        .write_event(Event::End(BytesEnd::new("command")))
        .expect(WRITE_INFALLIBLE);
}

fn write_runner(writer: &mut Writer<Vec<u8>>, runner: &Runner) {
    let mut elem = BytesStart::new("runner");
    push_attr(&mut elem, "interface", runner.interface.as_str());
    push_attr(&mut elem, "command", &runner.command);
    if let Some(versions) = &runner.versions {
        push_attr(&mut elem, "version", &versions.to_string());
    }
    writer.write_event(Event::Start(elem)).expect(WRITE_INFALLIBLE);
    for arg in &runner.arguments {
        write_text_element(writer, "arg", arg);
    }
    writer
        .write_event(Event::End(BytesEnd::new("runner")))
        .expect(WRITE_INFALLIBLE);
}

fn write_dependency(writer: &mut Writer<Vec<u8>>, dependency: &Dependency) {
    let tag = match dependency.importance {
        Importance::Essential => "requires",
        Importance::Recommended => "recommends",
    };
    let elem = restriction_attrs(tag, &dependency.restriction);
    if dependency.bindings.is_empty() {
        writer.write_event(Event::Empty(elem)).expect(WRITE_INFALLIBLE);
        return;
    }
    writer.write_event(Event::Start(elem)).expect(WRITE_INFALLIBLE);
    for binding in &dependency.bindings {
        write_binding(writer, binding);
    }
    writer.write_event(Event::End(BytesEnd::new(tag))).expect(WRITE_INFALLIBLE);
}

fn write_restriction(writer: &mut Writer<Vec<u8>>, tag: &str, restriction: &Restriction) {
    let elem = restriction_attrs(tag, restriction);
    writer.write_event(Event::Empty(elem)).expect(WRITE_INFALLIBLE);
}

fn restriction_attrs<'a>(tag: &'a str, restriction: &Restriction) -> BytesStart<'a> {
    let mut elem = BytesStart::new(tag);
    push_attr(&mut elem, "interface", restriction.interface.as_str());
    if let Some(versions) = &restriction.versions {
        push_attr(&mut elem, "version", &versions.to_string());
    }
    if let Some(os) = &restriction.os {
        push_attr(&mut elem, "os", os);
    }
    if !restriction.distributions.is_empty() {
        push_attr(&mut elem, "distributions", &restriction.distributions.join(" "));
    }
    elem
}

fn write_binding(writer: &mut Writer<Vec<u8>>, binding: &Binding) {
    let elem = match binding {
        Binding::Environment { name, insert, value, mode, separator, default } => {
            let mut elem = BytesStart::new("environment");
            push_attr(&mut elem, "name", name);
            if let Some(insert) = insert {
                push_attr(&mut elem, "insert", insert.as_str());
            }
            if let Some(value) = value {
                push_attr(&mut elem, "value", value);
            }
            let mode_str = match mode {
                EnvironmentMode::Replace => "replace",
                EnvironmentMode::Prepend => "prepend",
                EnvironmentMode::Append => "append",
            };
            push_attr(&mut elem, "mode", mode_str);
            if let Some(separator) = separator {
                push_attr(&mut elem, "separator", separator);
            }
            if let Some(default) = default {
                push_attr(&mut elem, "default", default);
            }
            elem
        }
        Binding::ExecutableInVar { name, command } => {
            let mut elem = BytesStart::new("executable-in-var");
            push_attr(&mut elem, "name", name);
            push_attr(&mut elem, "command", command);
            elem
        }
        Binding::ExecutableInPath { name, command } => {
            let mut elem = BytesStart::new("executable-in-path");
            push_attr(&mut elem, "name", name);
            push_attr(&mut elem, "command", command);
            elem
        }
        Binding::Overlay { src, mount_point } => {
            let mut elem = BytesStart::new("overlay");
            if let Some(src) = src {
                push_attr(&mut elem, "src", src.as_str());
            }
            push_attr(&mut elem, "mount-point", mount_point.as_str());
            elem
        }
    };
    writer.write_event(Event::Empty(elem)).expect(WRITE_INFALLIBLE);
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect(WRITE_INFALLIBLE);
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect(WRITE_INFALLIBLE);
    writer.write_event(Event::End(BytesEnd::new(tag))).expect(WRITE_INFALLIBLE);
}

// A minimal attrs-plus-children tree, built once from the quick-xml event
// stream so the rest of this module reads like ordinary tree-shaped data
// wrangling rather than a streaming state machine (the same split
// `zeroinstall-engine`'s feed parser makes, duplicated here since this
// crate can't depend on that one).
struct XmlNode {
    tag: String,
    attrs: BTreeMap<String, String>,
    children: Vec<XmlNode>,
    text: String,
}

fn local_tag_name(e: &BytesStart) -> String {
    let raw = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    raw.rsplit(':').next().unwrap_or(&raw).to_owned()
}

fn parse_attrs(e: &BytesStart) -> Result<BTreeMap<String, String>, SelectionsXmlError> {
    let mut map = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn xml_err(e: impl std::fmt::Display) -> SelectionsXmlError {
    SelectionsXmlError(e.to_string())
}

fn parse_xml_tree(bytes: &[u8]) -> Result<XmlNode, SelectionsXmlError> {
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
                return Ok(XmlNode { tag, attrs, children: Vec::new(), text: String::new() });
            }
            Event::Eof => return Err(SelectionsXmlError("no root element found".into())),
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
) -> Result<XmlNode, SelectionsXmlError> {
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
                children.push(XmlNode { tag: child_tag, attrs: child_attrs, children: Vec::new(), text: String::new() });
            }
            Event::Text(e) => {
                text.push_str(&e.unescape().map_err(xml_err)?);
            }
            Event::End(_) => {
                return Ok(XmlNode { tag, attrs, children, text });
            }
            Event::Eof => return Err(SelectionsXmlError(format!("unexpected end of document inside <{tag}>"))),
            _ => {}
        }
        buf.clear();
    }
}

fn get_attr<'a>(node: &'a XmlNode, name: &str) -> Option<&'a str> {
    node.attrs.get(name).map(String::as_str)
}

fn require_attr<'a>(node: &'a XmlNode, name: &str) -> Result<&'a str, SelectionsXmlError> {
    get_attr(node, name).ok_or_else(|| SelectionsXmlError(format!("<{}> missing required '{name}' attribute", node.tag)))
}

fn text_of(node: &XmlNode) -> String {
    node.text.trim().to_owned()
}

fn space_separated(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_owned).collect()
}

fn parse_command(node: &XmlNode) -> Result<Command, SelectionsXmlError> {
    let name = require_attr(node, "name")?.to_owned();
    let path = get_attr(node, "path").map(camino::Utf8PathBuf::from);
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

fn parse_runner(node: &XmlNode) -> Result<Runner, SelectionsXmlError> {
    Ok(Runner {
        interface: FeedUri::new(require_attr(node, "interface")?.to_owned()),
        command: get_attr(node, "command").unwrap_or("run").to_owned(),
        arguments: node.children.iter().filter(|c| c.tag == "arg").map(text_of).collect(),
        versions: get_attr(node, "version").and_then(VersionRange::parse_range_expr),
    })
}

fn parse_dependency(node: &XmlNode, importance: Importance) -> Result<Dependency, SelectionsXmlError> {
    let restriction = parse_restriction(node)?;
    let mut bindings = Vec::new();
    for child in &node.children {
        if let Some(binding) = parse_binding(child)? {
            bindings.push(binding);
        }
    }
    Ok(Dependency { importance, restriction, bindings })
}

fn parse_restriction(node: &XmlNode) -> Result<Restriction, SelectionsXmlError> {
    Ok(Restriction {
        interface: FeedUri::new(require_attr(node, "interface")?.to_owned()),
        versions: get_attr(node, "version").and_then(VersionRange::parse_range_expr),
        os: get_attr(node, "os").map(str::to_owned),
        distributions: get_attr(node, "distributions").map(space_separated).unwrap_or_default(),
    })
}

fn parse_binding(node: &XmlNode) -> Result<Option<Binding>, SelectionsXmlError> {
    match node.tag.as_str() {
        "environment" => Ok(Some(Binding::Environment {
            name: require_attr(node, "name")?.to_owned(),
            insert: get_attr(node, "insert").map(camino::Utf8PathBuf::from),
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
            src: get_attr(node, "src").map(camino::Utf8PathBuf::from),
            mount_point: camino::Utf8PathBuf::from(get_attr(node, "mount-point").unwrap_or("/")),
        })),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(interface: &str, version: &str) -> ImplementationSelection {
        ImplementationSelection {
            interface_uri: FeedUri::new(interface.to_owned()),
            from_feed: FeedUri::new(interface.to_owned()),
            id: format!("sha256new_{version}"),
            version: ImplementationVersion::parse(version).unwrap(),
            architecture: None,
            stability: Stability::Stable,
            manifest_digest: ManifestDigest::new(),
            command: None,
            dependencies: vec![],
            restrictions: vec![],
            bindings: vec![],
            local_path: None,
        }
    }

    #[test]
    fn diff_detects_added_removed_and_changed() {
        let old = Selections {
            interface_uri: None,
            command: None,
            implementations: vec![selection("a", "1.0"), selection("b", "1.0")],
        };
        let new = Selections {
            interface_uri: None,
            command: None,
            implementations: vec![selection("a", "2.0"), selection("c", "1.0")],
        };
        let diff = Selections::diff(&old, &new);
        assert_eq!(diff.len(), 3);
        assert!(diff.iter().any(|d| matches!(d, SelectionsDiff::VersionChanged { interface, .. } if interface.as_str() == "a")));
        assert!(diff.iter().any(|d| matches!(d, SelectionsDiff::Added { interface } if interface.as_str() == "c")));
        assert!(diff.iter().any(|d| matches!(d, SelectionsDiff::Removed { interface } if interface.as_str() == "b")));
    }

    #[test]
    fn get_finds_by_interface() {
        let selections = Selections {
            interface_uri: None,
            command: None,
            implementations: vec![selection("a", "1.0")],
        };
        assert!(selections.get(&FeedUri::new("a".into())).is_some());
        assert!(selections.get(&FeedUri::new("z".into())).is_none());
    }

    #[test]
    fn xml_round_trips_a_plain_selection() {
        let selections = Selections {
            interface_uri: Some(FeedUri::new("https://example.com/app.xml".into())),
            command: Some("run".into()),
            implementations: vec![selection("https://example.com/app.xml", "1.0")],
        };
        let xml = selections.to_xml();
        assert!(xml.starts_with("<selections"));
        let parsed = Selections::from_xml(&xml).unwrap();
        assert_eq!(parsed, selections);
    }

    #[test]
    fn xml_round_trips_nested_command_dependency_restriction_and_bindings() {
        let mut digest = ManifestDigest::new();
        digest.insert(ManifestFormat::Sha256New, "abcdefgh".into());

        let mut impl_sel = selection("https://example.com/app.xml", "1.2.3-pre1");
        impl_sel.architecture = Architecture::parse("Linux-x86_64");
        impl_sel.manifest_digest = digest;
        impl_sel.local_path = Some(camino::Utf8PathBuf::from("/opt/app"));
        impl_sel.command = Some(Command {
            name: "run".into(),
            path: Some(camino::Utf8PathBuf::from("bin/app")),
            arguments: vec!["--flag".into()],
            runner: Some(Box::new(Runner {
                interface: FeedUri::new("https://example.com/runner.xml".into()),
                command: "run".into(),
                arguments: vec!["-jar".into()],
                versions: VersionRange::parse_range_expr("1.0.."),
            })),
            dependencies: vec![Dependency {
                importance: Importance::Recommended,
                restriction: Restriction {
                    interface: FeedUri::new("https://example.com/lib.xml".into()),
                    versions: VersionRange::parse_range_expr("1.0..!2.0"),
                    os: Some("Linux".into()),
                    distributions: vec!["deb".into(), "rpm".into()],
                },
                bindings: vec![Binding::ExecutableInPath { name: "lib-tool".into(), command: "run".into() }],
            }],
            bindings: vec![Binding::Environment {
                name: "PATH".into(),
                insert: Some(camino::Utf8PathBuf::from("bin")),
                value: None,
                mode: EnvironmentMode::Prepend,
                separator: None,
                default: None,
            }],
        });
        impl_sel.restrictions = vec![Restriction {
            interface: FeedUri::new("https://example.com/other.xml".into()),
            versions: None,
            os: None,
            distributions: vec![],
        }];
        impl_sel.bindings = vec![Binding::Overlay {
            src: Some(camino::Utf8PathBuf::from("share")),
            mount_point: camino::Utf8PathBuf::from("/usr/share/app"),
        }];

        let selections = Selections {
            interface_uri: Some(FeedUri::new("https://example.com/app.xml".into())),
            command: Some("run".into()),
            implementations: vec![impl_sel.clone()],
        };

        let xml = selections.to_xml();
        let parsed = Selections::from_xml(&xml).unwrap();
        assert_eq!(parsed, selections);
        assert_eq!(parsed.implementations[0], impl_sel);
    }

    #[test]
    fn from_xml_rejects_a_non_selections_root() {
        let err = Selections::from_xml("<feed></feed>").unwrap_err();
        assert!(err.to_string().contains("selections"));
    }

    #[test]
    fn from_xml_rejects_a_selection_missing_required_attrs() {
        let xml = r#"<selections><selection from-feed="a" id="x" version="1.0"/></selections>"#;
        assert!(Selections::from_xml(xml).is_err());
    }
}
