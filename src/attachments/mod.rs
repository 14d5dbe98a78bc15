// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Attachment handling
//!
//! Classifies uploaded files by media kind and prepares images for inline
//! transmission to the chat backends.

pub mod pipeline;

use serde::{Deserialize, Serialize};

pub use pipeline::{compress_image, load_image, persist_file};

/// Media kind derived from a file extension
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Document,
    Archive,
    Other,
}

impl MediaKind {
    /// Classify a filename by its extension, case-insensitively.
    /// Unknown or missing extensions map to `Other`.
    pub fn classify(filename: &str) -> Self {
        let ext = match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_uppercase(),
            _ => return MediaKind::Other,
        };

        match ext.as_str() {
            "PNG" | "JPG" | "JPEG" | "GIF" | "SVG" => MediaKind::Image,
            "MP4" | "AVI" | "MOV" | "WMV" | "MPG" | "MPEG" => MediaKind::Video,
            "DOC" | "DOCX" | "PDF" | "PPT" | "PPTX" | "XLS" | "XLSX" | "TXT" | "CSV" => {
                MediaKind::Document
            }
            "ZIP" | "RAR" | "7Z" | "TAR" | "GZ" | "BZ2" | "ISO" => MediaKind::Archive,
            _ => MediaKind::Other,
        }
    }

    /// Directory name used for kind-segregated attachment storage
    pub fn dir_name(&self) -> &'static str {
        match self {
            MediaKind::Image => "images",
            MediaKind::Video => "videos",
            MediaKind::Document => "documents",
            MediaKind::Archive => "archives",
            MediaKind::Other => "others",
        }
    }

    /// Parse a stored kind string back into the enum
    pub fn parse(s: &str) -> Self {
        match s {
            "images" | "image" => MediaKind::Image,
            "videos" | "video" => MediaKind::Video,
            "documents" | "document" => MediaKind::Document,
            "archives" | "archive" => MediaKind::Archive,
            _ => MediaKind::Other,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}
