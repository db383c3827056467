//! Fresh single-generation rewrite, discarding all `/Prev` history,
//! including the clear (bulk field removal) structural rewrite.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::dictscan::{self, is_widget};
use crate::error::{PdfError, PdfResult};
use crate::patch::PatchQueue;
use crate::reference::ObjRef;
use crate::resolver::ObjectResolver;

/// Rewrites `resolver`'s materialized view (with any queued patches
/// applied on top) as a fresh, single-generation document.
pub fn write_full(resolver: &mut ObjectResolver, queue: &PatchQueue) -> PdfResult<Vec<u8>> {
    let bodies = merged_bodies(resolver, queue)?;
    let root_ref = resolver
        .root_ref()
        .ok_or_else(|| PdfError::malformed_xref("original trailer has no /Root"))?;
    let info_ref = resolver.info_ref();
    emit_full(&bodies, root_ref, info_ref)
}

/// Like [`write_full`], but first removes `drop_fields` and
/// `drop_widgets` from the output and rewrites every page's `/Annots`
/// and the AcroForm's `/Fields` array to no longer reference them.
pub fn write_full_clearing(
    resolver: &mut ObjectResolver,
    queue: &PatchQueue,
    acroform_ref: ObjRef,
    drop_fields: &HashSet<ObjRef>,
    drop_widgets: &HashSet<ObjRef>,
) -> PdfResult<Vec<u8>> {
    let mut bodies = merged_bodies(resolver, queue)?;

    let retained_fields: HashSet<ObjRef> = bodies
        .keys()
        .copied()
        .filter(|r| !drop_fields.contains(r))
        .collect();

    let mut orphaned_widgets: HashSet<ObjRef> = HashSet::new();
    for (&obj_ref, body) in bodies.iter() {
        if !is_widget(body) {
            continue;
        }
        // A widget with no /Parent is a merged field/widget: the field
        // dict doubles as the annotation, so there's no separate parent
        // to check against. Only a /Parent that fails to resolve to a
        // retained field makes the widget orphaned.
        if let Some(parent) = parent_ref(body) {
            if !retained_fields.contains(&parent) {
                orphaned_widgets.insert(obj_ref);
            }
        }
    }

    let mut all_dropped_widgets: HashSet<ObjRef> = drop_widgets.clone();
    all_dropped_widgets.extend(orphaned_widgets);

    let page_refs: Vec<ObjRef> = bodies
        .iter()
        .filter(|(_, body)| dictscan::value_token_after(body, "Type") == Some(&b"/Page"[..]))
        .map(|(r, _)| *r)
        .collect();

    for page_ref in page_refs {
        rewrite_annots(&mut bodies, page_ref, &all_dropped_widgets);
    }

    if let Some(acroform_body) = bodies.get(&acroform_ref).cloned() {
        if let Some(fields_token) = dictscan::value_token_after(&acroform_body, "Fields") {
            if fields_token.first() == Some(&b'[') {
                let mut array = fields_token.to_vec();
                for field_ref in drop_fields {
                    array = dictscan::remove_ref_from_array(&array, *field_ref);
                }
                let new_body = dictscan::replace_key_value(&acroform_body, "Fields", &array);
                bodies.insert(acroform_ref, new_body);
            }
        }
    }

    for obj_ref in drop_fields.iter().chain(all_dropped_widgets.iter()) {
        bodies.remove(obj_ref);
    }

    debug!(
        dropped_fields = drop_fields.len(),
        dropped_widgets = all_dropped_widgets.len(),
        "cleared fields before full rewrite"
    );

    let root_ref = resolver
        .root_ref()
        .ok_or_else(|| PdfError::malformed_xref("original trailer has no /Root"))?;
    let info_ref = resolver.info_ref();
    emit_full(&bodies, root_ref, info_ref)
}

fn merged_bodies(resolver: &mut ObjectResolver, queue: &PatchQueue) -> PdfResult<BTreeMap<ObjRef, Vec<u8>>> {
    let mut bodies = BTreeMap::new();
    for (obj_ref, body) in resolver.each_object()? {
        bodies.insert(obj_ref, body.as_ref().clone());
    }
    for (obj_ref, body) in queue.render() {
        bodies.insert(obj_ref, body);
    }
    Ok(bodies)
}

fn parent_ref(widget_body: &[u8]) -> Option<ObjRef> {
    let token = dictscan::value_token_after(widget_body, "Parent")?;
    parse_ref_token(token)
}

fn parse_ref_token(token: &[u8]) -> Option<ObjRef> {
    let text = std::str::from_utf8(token).ok()?;
    let mut parts = text.split_whitespace();
    let num: i64 = parts.next()?.parse().ok()?;
    let generation: u16 = parts.next()?.parse().ok()?;
    if parts.next()? != "R" {
        return None;
    }
    Some(ObjRef::new(num, generation))
}

fn rewrite_annots(bodies: &mut BTreeMap<ObjRef, Vec<u8>>, page_ref: ObjRef, drop_widgets: &HashSet<ObjRef>) {
    let Some(page_body) = bodies.get(&page_ref).cloned() else {
        return;
    };
    let Some(annots_token) = dictscan::value_token_after(&page_body, "Annots") else {
        return;
    };

    if annots_token.first() == Some(&b'[') {
        let mut array = annots_token.to_vec();
        for widget_ref in annots_refs(&array).into_iter().filter(|r| drop_widgets.contains(r)) {
            array = dictscan::remove_ref_from_array(&array, widget_ref);
        }
        let new_page_body = dictscan::replace_key_value(&page_body, "Annots", &array);
        bodies.insert(page_ref, new_page_body);
    } else if let Some(array_ref) = parse_ref_token(annots_token) {
        if let Some(array_body) = bodies.get(&array_ref).cloned() {
            let mut array = array_body;
            for widget_ref in annots_refs(&array).into_iter().filter(|r| drop_widgets.contains(r)) {
                array = dictscan::remove_ref_from_array(&array, widget_ref);
            }
            bodies.insert(array_ref, array);
        }
    }
}

fn annots_refs(array_token: &[u8]) -> Vec<ObjRef> {
    let inner = if array_token.len() >= 2 && array_token[0] == b'[' && array_token[array_token.len() - 1] == b']' {
        &array_token[1..array_token.len() - 1]
    } else {
        array_token
    };
    let tokens: Vec<&[u8]> = inner.split(|b| b.is_ascii_whitespace()).filter(|t| !t.is_empty()).collect();
    let mut refs = Vec::new();
    let mut i = 0;
    while i + 2 < tokens.len() {
        if tokens[i + 2] == b"R" {
            if let (Ok(num), Ok(gen)) = (
                std::str::from_utf8(tokens[i]).unwrap_or("").parse::<i64>(),
                std::str::from_utf8(tokens[i + 1]).unwrap_or("").parse::<u16>(),
            ) {
                refs.push(ObjRef::new(num, gen));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    refs
}

fn emit_full(bodies: &BTreeMap<ObjRef, Vec<u8>>, root_ref: ObjRef, info_ref: Option<ObjRef>) -> PdfResult<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n");

    let mut offsets: Vec<(i64, u64, u16)> = Vec::with_capacity(bodies.len());
    for (obj_ref, body) in bodies {
        let offset = out.len() as u64;
        out.extend_from_slice(format!("{} {} obj\n", obj_ref.num, obj_ref.generation).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
        offsets.push((obj_ref.num, offset, obj_ref.generation));
    }

    let max_num = offsets.iter().map(|(n, _, _)| *n).max().unwrap_or(0);
    let size = max_num + 1;

    let xref_offset = out.len() as u64;
    out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");

    let mut by_num: BTreeMap<i64, (u64, u16)> = BTreeMap::new();
    for (num, offset, gen) in &offsets {
        by_num.insert(*num, (*offset, *gen));
    }
    for num in 1..=max_num {
        match by_num.get(&num) {
            Some((offset, gen)) => out.extend_from_slice(format!("{:010} {:05} n \n", offset, gen).as_bytes()),
            None => out.extend_from_slice(b"0000000000 00000 f \n"),
        }
    }

    let root_text = format!("{} {} R", root_ref.num, root_ref.generation);
    out.extend_from_slice(format!("trailer\n<< /Size {} /Root {}", size, root_text).as_bytes());
    if let Some(info) = info_ref {
        out.extend_from_slice(format!(" /Info {} {} R", info.num, info.generation).as_bytes());
    }
    out.extend_from_slice(format!(" >>\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());

    validate_output(&out)?;
    Ok(out)
}

fn validate_output(out: &[u8]) -> PdfResult<()> {
    if !contains(out, b"xref") || !contains(out, b"trailer") || !contains(out, b"startxref") || !contains(out, b"%%EOF") {
        return Err(PdfError::malformed_xref("full rewrite output missing a required marker"));
    }
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
