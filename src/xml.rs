//! Table-of-contents XML: hand-rolled, event-based ser/de over [`model`](crate::model).
//!
//! The TOC has no fixed shape (any property can carry unknown children and
//! attributes that must survive a read-then-write round trip), so this
//! walks [`quick_xml`] events directly instead of deriving `Serialize`/
//! `Deserialize` onto a fixed struct.

use std::io::Error;
use std::io::ErrorKind;
use std::os::unix::ffi::OsStringExt;

use base64ct::Base64;
use base64ct::Encoding as _;
use quick_xml::events::BytesEnd;
use quick_xml::events::BytesStart;
use quick_xml::events::BytesText;
use quick_xml::events::Event;
use quick_xml::Reader;
use quick_xml::Writer;

use crate::checksum::ChecksumAlgo;
use crate::model::Attribute;
use crate::model::File;
use crate::model::Property;
use crate::model::Signature;
use crate::model::Subdocument;
use crate::model::Timestamp;
use crate::model::Toc;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Serialize a [`Toc`] into the `<xar><toc>...</toc></xar>` document that
/// gets compressed and stored right after the header.
pub fn write_toc(toc: &Toc) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    out.extend_from_slice(XML_DECLARATION.as_bytes());
    let mut writer = Writer::new(&mut out);
    writer
        .create_element("xar")
        .write_inner_content(|writer| {
            writer
                .create_element("toc")
                .write_inner_content(|writer| write_toc_body(writer, toc))?;
            Ok(())
        })?;
    Ok(out)
}

fn write_toc_body<W: std::io::Write>(writer: &mut Writer<W>, toc: &Toc) -> std::io::Result<()> {
    writer
        .create_element("checksum")
        .with_attribute(("style", toc.checksum_algo.name()))
        .write_inner_content(|writer| {
            write_text_element(writer, "offset", &toc.checksum_offset.to_string())?;
            write_text_element(writer, "size", &toc.checksum_size.to_string())?;
            Ok(())
        })?;
    write_text_element(writer, "creation-time", &toc.creation_time.to_string())?;
    for file in &toc.files {
        write_file(writer, file)?;
    }
    for subdoc in &toc.subdocuments {
        writer
            .create_element("subdoc")
            .with_attribute(("name", subdoc.name.as_str()))
            .write_inner_content(|writer| {
                writer.get_mut().write_all(subdoc.xml.as_bytes())?;
                Ok(())
            })?;
    }
    for sig in &toc.signatures {
        write_signature(writer, sig)?;
    }
    Ok(())
}

fn write_file<W: std::io::Write>(writer: &mut Writer<W>, file: &File) -> std::io::Result<()> {
    writer
        .create_element("file")
        .with_attribute(("id", file.id.to_string().as_str()))
        .write_inner_content(|writer| {
            write_name(writer, &file.name)?;
            for prop in &file.properties {
                write_property(writer, prop)?;
            }
            if !file.ea.is_empty() {
                writer.create_element("ea").write_inner_content(|writer| {
                    for prop in &file.ea {
                        write_property(writer, prop)?;
                    }
                    Ok(())
                })?;
            }
            for child in &file.children {
                write_file(writer, child)?;
            }
            Ok(())
        })?;
    Ok(())
}

fn write_property<W: std::io::Write>(writer: &mut Writer<W>, prop: &Property) -> std::io::Result<()> {
    let mut elem = writer.create_element(prop.key.as_str());
    if let Some(ns) = &prop.ns {
        elem = elem.with_attribute(("xmlns", ns.as_str()));
    }
    for attr in &prop.attrs {
        elem = elem.with_attribute((attr.key.as_str(), attr.value.as_str()));
    }
    if prop.value.is_none() && prop.children.is_empty() {
        elem.write_empty()?;
        return Ok(());
    }
    elem.write_inner_content(|writer| {
        if let Some(value) = &prop.value {
            writer.write_event(Event::Text(BytesText::new(value)))?;
        }
        for child in &prop.children {
            write_property(writer, child)?;
        }
        Ok(())
    })?;
    Ok(())
}

fn write_signature<W: std::io::Write>(writer: &mut Writer<W>, sig: &Signature) -> std::io::Result<()> {
    let tag = if sig.style == "RSA" { "signature" } else { "x-signature" };
    writer
        .create_element(tag)
        .with_attribute(("style", sig.style.as_str()))
        .write_inner_content(|writer| {
            write_text_element(writer, "offset", &sig.offset.to_string())?;
            write_text_element(writer, "size", &sig.size.to_string())?;
            writer
                .create_element("KeyInfo")
                .with_attribute(("xmlns", XMLDSIG_NS))
                .write_inner_content(|writer| {
                    writer.create_element("X509Data").write_inner_content(|writer| {
                        for cert in &sig.certificates {
                            write_text_element(writer, "X509Certificate", &Base64::encode_string(cert))?;
                        }
                        Ok(())
                    })?;
                    Ok(())
                })?;
            Ok(())
        })?;
    Ok(())
}

/// Write the `<name>` element, base64-encoding it with `enctype="base64"`
/// when the raw path bytes don't round-trip through ISO-8859-1 (spec §4.4).
fn write_name<W: std::io::Write>(writer: &mut Writer<W>, name: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::ffi::OsStrExt;
    let mut prop = Property::new("name");
    prop.set_text_value(name.as_os_str().as_bytes());
    write_property(writer, &prop)
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    text: &str,
) -> std::io::Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

/// Parse the `<xar><toc>...</toc></xar>` document back into a [`Toc`].
pub fn read_toc(xml: &[u8]) -> Result<Toc, Error> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut toc = Toc::default();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) if local_name(&e) == "toc" => {
                read_toc_body(&mut reader, &mut toc)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(toc)
}

fn read_toc_body(reader: &mut Reader<&[u8]>, toc: &mut Toc) -> Result<(), Error> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                let name = local_name(&e).to_string();
                match name.as_str() {
                    "checksum" => {
                        let style = attr(&e, "style").unwrap_or_default();
                        toc.checksum_algo = ChecksumAlgo::from_name(&style);
                        let prop = read_property_body(reader, "checksum")?;
                        toc.checksum_offset = prop
                            .child("offset")
                            .and_then(Property::value_str)
                            .and_then(|s| s.parse().ok())
                            .unwrap_or_default();
                        toc.checksum_size = prop
                            .child("size")
                            .and_then(Property::value_str)
                            .and_then(|s| s.parse().ok())
                            .unwrap_or_default();
                    }
                    "creation-time" => {
                        let text = read_text_only(reader, "creation-time")?;
                        toc.creation_time = Timestamp::parse(&text).unwrap_or_default();
                    }
                    "file" => {
                        let id = attr(&e, "id").and_then(|s| s.parse().ok()).unwrap_or_default();
                        toc.files.push(read_file_body(reader, id)?);
                    }
                    "subdoc" => {
                        let doc_name = attr(&e, "name").unwrap_or_default();
                        let inner = read_raw_inner(reader, "subdoc")?;
                        toc.subdocuments.push(Subdocument { name: doc_name, xml: inner });
                    }
                    "signature" | "x-signature" => {
                        toc.signatures.push(read_signature_body(reader, &e)?);
                    }
                    _ => {
                        read_property_body(reader, &name)?;
                    }
                }
            }
            Event::End(e) if local_name_end(&e) == "toc" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn read_file_body(reader: &mut Reader<&[u8]>, id: u64) -> Result<File, Error> {
    let mut file = File {
        id,
        ..Default::default()
    };
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) | Event::Empty(e) => {
                let name = local_name(&e).to_string();
                match name.as_str() {
                    "name" => {
                        let prop = read_property_from_start(reader, &e)?;
                        let bytes = prop.text_value().unwrap_or_default();
                        file.name = std::ffi::OsString::from_vec(bytes).into();
                    }
                    "file" => {
                        let child_id = attr(&e, "id").and_then(|s| s.parse().ok()).unwrap_or_default();
                        file.children.push(read_file_body(reader, child_id)?);
                    }
                    "ea" => {
                        file.ea = read_property_body(reader, "ea")?.children;
                    }
                    _ => {
                        file.properties.push(read_property_from_start(reader, &e)?);
                    }
                }
            }
            Event::End(e) if local_name_end(&e) == "file" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(file)
}

fn read_property_from_start(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Property, Error> {
    let name = local_name(start).to_string();
    let mut prop = read_property_body(reader, &name)?;
    prop.ns = attr(start, "xmlns");
    for a in start.attributes() {
        let a = a.map_err(xml_err)?;
        let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
        if key == "xmlns" {
            continue;
        }
        let value = a.unescape_value().map_err(xml_err)?.into_owned();
        prop.attrs.push(Attribute { key, value, ns: None });
    }
    Ok(prop)
}

/// Read the body of an element (already past its `Start`/`Empty` event) as a
/// generic [`Property`], consuming up to and including its matching `End`.
fn read_property_body(reader: &mut Reader<&[u8]>, tag: &str) -> Result<Property, Error> {
    let mut prop = Property::new(tag);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                let child = read_property_from_start(reader, &e)?;
                prop.children.push(child);
            }
            Event::Empty(e) => {
                let name = local_name(&e).to_string();
                let mut child = Property::new(name);
                for a in e.attributes() {
                    let a = a.map_err(xml_err)?;
                    let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
                    let value = a.unescape_value().map_err(xml_err)?.into_owned();
                    child.attrs.push(Attribute { key, value, ns: None });
                }
                prop.children.push(child);
            }
            Event::Text(t) => {
                let raw = std::str::from_utf8(&t).map_err(|e| xml_err(e))?;
                let text = quick_xml::escape::unescape(raw).map_err(xml_err)?.into_owned();
                if !text.trim().is_empty() {
                    prop.value = Some(text);
                }
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                prop.value = Some(text);
            }
            Event::End(e) if local_name_end(&e) == tag => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(prop)
}

fn read_text_only(reader: &mut Reader<&[u8]>, tag: &str) -> Result<String, Error> {
    Ok(read_property_body(reader, tag)?.value.unwrap_or_default())
}

fn read_signature_body(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Signature, Error> {
    let tag = local_name(start).to_string();
    let style = attr(start, "style").unwrap_or_default();
    let prop = read_property_body(reader, &tag)?;
    let offset = prop
        .child("offset")
        .and_then(Property::value_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    let size = prop
        .child("size")
        .and_then(Property::value_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    let mut certificates = Vec::new();
    if let Some(key_info) = prop.child("KeyInfo") {
        if let Some(x509) = key_info.child("X509Data") {
            for cert in &x509.children {
                if cert.key == "X509Certificate" {
                    if let Some(text) = cert.value_str() {
                        let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                        let bytes = Base64::decode_vec(&cleaned).map_err(|_| {
                            Error::new(ErrorKind::InvalidData, "invalid X509Certificate base64")
                        })?;
                        certificates.push(bytes);
                    }
                }
            }
        }
    }
    Ok(Signature {
        style,
        offset,
        size,
        certificates,
    })
}

/// Re-serialize the inner XML of an element verbatim-ish (re-emitted
/// through `quick_xml`, not byte-identical to the source) for opaque
/// subdocument fragments.
fn read_raw_inner(reader: &mut Reader<&[u8]>, tag: &str) -> Result<String, Error> {
    let mut out = Vec::new();
    let mut writer = Writer::new(&mut out);
    let mut buf = Vec::new();
    let mut depth = 0_u32;
    loop {
        let event = reader.read_event_into(&mut buf).map_err(xml_err)?;
        match &event {
            Event::Start(e) => {
                if local_name(e) == tag && depth == 0 {
                    // shouldn't happen: we're already inside
                }
                depth += 1;
                writer.write_event(event.borrow()).map_err(xml_err)?;
            }
            Event::End(e) => {
                if depth == 0 && local_name_end(e) == tag {
                    break;
                }
                depth = depth.saturating_sub(1);
                writer.write_event(event.borrow()).map_err(xml_err)?;
            }
            Event::Eof => break,
            _ => {
                writer.write_event(event.borrow()).map_err(xml_err)?;
            }
        }
        buf.clear();
    }
    String::from_utf8(out).map_err(|_| Error::new(ErrorKind::InvalidData, "subdoc is not valid UTF-8"))
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn local_name_end(e: &BytesEnd<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attr(e: &BytesStart, key: &str) -> Option<String> {
    e.attributes().find_map(|a| {
        let a = a.ok()?;
        if a.key.as_ref() == key.as_bytes() {
            Some(a.unescape_value().ok()?.into_owned())
        } else {
            None
        }
    })
}

fn xml_err(e: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::InvalidData, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::File;

    #[test]
    fn toc_roundtrip_simple() {
        let mut toc = Toc {
            checksum_algo: ChecksumAlgo::Sha1,
            checksum_offset: 0,
            checksum_size: 20,
            ..Default::default()
        };
        let mut file = File {
            id: 1,
            name: "hello.txt".into(),
            ..Default::default()
        };
        file.set_prop("type", "file");
        file.set_prop("mode", "0644");
        toc.files.push(file);

        let xml = write_toc(&toc).unwrap();
        let parsed = read_toc(&xml).unwrap();
        assert_eq!(parsed.checksum_algo, toc.checksum_algo);
        assert_eq!(parsed.checksum_size, toc.checksum_size);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].name, std::path::Path::new("hello.txt"));
        assert_eq!(parsed.files[0].kind(), crate::file_type::FileType::File);
        assert_eq!(parsed.files[0].mode(), crate::file_mode::FileMode::from(0o644));
    }

    #[test]
    fn nested_directory_roundtrip() {
        let mut toc = Toc::default();
        let mut dir = File {
            id: 1,
            name: "dir".into(),
            ..Default::default()
        };
        dir.set_prop("type", "directory");
        let mut child = File {
            id: 2,
            name: "inner.txt".into(),
            ..Default::default()
        };
        child.set_prop("type", "file");
        dir.children.push(child);
        toc.files.push(dir);

        let xml = write_toc(&toc).unwrap();
        let parsed = read_toc(&xml).unwrap();
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].children.len(), 1);
        assert_eq!(parsed.files[0].children[0].name, std::path::Path::new("inner.txt"));
    }

    #[test]
    fn non_latin1_name_roundtrips_through_base64() {
        let mut toc = Toc::default();
        let file = File {
            id: 1,
            name: "\u{65e5}\u{672c}\u{8a9e}.txt".into(),
            ..Default::default()
        };
        toc.files.push(file);

        let xml = write_toc(&toc).unwrap();
        assert!(String::from_utf8_lossy(&xml).contains(r#"enctype="base64""#));
        let parsed = read_toc(&xml).unwrap();
        assert_eq!(parsed.files[0].name, std::path::Path::new("\u{65e5}\u{672c}\u{8a9e}.txt"));
    }

    #[test]
    fn subdocument_roundtrip() {
        let mut toc = Toc::default();
        toc.subdocuments.push(Subdocument {
            name: "com.example.meta".into(),
            xml: "<key>value</key>".into(),
        });
        let xml = write_toc(&toc).unwrap();
        let parsed = read_toc(&xml).unwrap();
        assert_eq!(parsed.subdocuments.len(), 1);
        assert_eq!(parsed.subdocuments[0].name, "com.example.meta");
        assert!(parsed.subdocuments[0].xml.contains("value"));
    }
}
