// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Resolution-independent rendition of a mark as a standalone SVG string.
// Pure serialisation: no surface, no font data.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tilemark_core::mark::{MarkContent, MarkSpec};

/// Serialise `spec` into an SVG of `width × height` user units with the
/// content centred and rotated about the centre.
pub fn render_svg(spec: &MarkSpec, width: u32, height: u32) -> String {
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    // SVG rotates clockwise for positive angles; mark rotation is
    // counter-clockwise.
    let transform = format!("rotate({} {cx} {cy})", fmt_num(-spec.rotation));
    let opacity = fmt_num(spec.opacity * f32::from(spec.color.a) / 255.0);

    let body = match &spec.content {
        MarkContent::Text(text) => {
            let families = spec
                .font_families
                .iter()
                .map(|f| format!("'{f}'"))
                .chain(std::iter::once("sans-serif".to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                r#"<text x="{cx}" y="{cy}" text-anchor="middle" dominant-baseline="central" font-family="{}" font-size="{}" fill="{}" fill-opacity="{opacity}" transform="{transform}">{}</text>"#,
                escape_xml(&families),
                fmt_num(spec.size),
                spec.color.to_hex(),
                escape_xml(text),
            )
        }
        MarkContent::Image(bytes) => {
            let scale = spec.scale.unwrap_or(1.0);
            let (w, h) = (width as f32 * scale, height as f32 * scale);
            format!(
                r#"<image x="{}" y="{}" width="{}" height="{}" opacity="{opacity}" transform="{transform}" href="data:{};base64,{}"/>"#,
                fmt_num(cx - w / 2.0),
                fmt_num(cy - h / 2.0),
                fmt_num(w),
                fmt_num(h),
                sniff_mime(bytes),
                STANDARD.encode(bytes),
            )
        }
    };

    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">{body}</svg>"#
    )
}

fn fmt_num(value: f32) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded == rounded.trunc() {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        Ok(image::ImageFormat::Gif) => "image/gif",
        Ok(image::ImageFormat::WebP) => "image/webp",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilemark_core::mark::Rgba;

    #[test]
    fn text_mark_serialises_style() {
        let spec = MarkSpec::text("R&D <draft>")
            .with_color(Rgba::rgb(255, 0, 0))
            .with_opacity(0.5)
            .with_rotation(30.0);
        let svg = render_svg(&spec, 200, 100);

        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("R&amp;D &lt;draft&gt;"));
        assert!(svg.contains(r##"fill="#ff0000""##));
        assert!(svg.contains(r#"fill-opacity="0.5""#));
        assert!(svg.contains("rotate(-30 100 50)"));
        assert!(svg.contains("'Helvetica', 'Arial', 'Noto Sans', sans-serif"));
    }

    #[test]
    fn image_mark_embeds_data_uri() {
        let spec = MarkSpec::image(vec![0x89, b'P', b'N', b'G']);
        let svg = render_svg(&spec, 10, 10);
        assert!(svg.contains("href=\"data:image/png;base64,iVBORw==\""));
    }
}
