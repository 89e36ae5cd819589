//! JSON manifest describing a batch of artifacts and shared assets.
//!
//! Relative paths resolve against the directory holding the manifest.
//!
//! ```json
//! {
//!   "rulers": { "1cm": "assets/ruler_1cm.png", "5cm": "assets/ruler_5cm.png" },
//!   "logo": "assets/logo.png",
//!   "artifacts": [
//!     {
//!       "id": "inv-1904-12",
//!       "views": { "obverse": "1904-12/a.jpg", "reverse": "1904-12/b.jpg" },
//!       "extended": [
//!         { "anchor": "obverse", "direction": "left", "photos": ["1904-12/l1.jpg"] }
//!       ],
//!       "attachments": { "top": "reverse" },
//!       "background": "dark"
//!     }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use stele_pipeline::{
    Anchor, ArtifactInput, AssetBundle, BackgroundHint, Direction, RgbaImage, RulerEdge,
    RulerSize, SideAssignments, SideRole, ViewSlot,
};

use crate::error::CliError;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub rulers: BTreeMap<RulerSize, PathBuf>,
    #[serde(default)]
    pub logo: Option<PathBuf>,
    pub artifacts: Vec<ArtifactEntry>,
}

/// One artifact: its photos and the hints for processing them.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactEntry {
    pub id: String,
    pub views: BTreeMap<SideRole, PathBuf>,
    #[serde(default)]
    pub extended: Vec<ExtendedEntry>,
    /// Fixed sides that sit against Reverse instead of Obverse.
    #[serde(default)]
    pub attachments: BTreeMap<Direction, Anchor>,
    #[serde(default)]
    pub ruler_edge: RulerEdge,
    #[serde(default)]
    pub scale_view: Option<SideRole>,
    #[serde(default)]
    pub background: BackgroundHint,
    /// Per-view backdrop hints, keyed by fixed side.
    #[serde(default)]
    pub background_overrides: BTreeMap<SideRole, BackgroundHint>,
}

/// A strip of photos along one edge of an anchor, nearest first.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtendedEntry {
    pub anchor: Anchor,
    pub direction: Direction,
    pub photos: Vec<PathBuf>,
}

impl Manifest {
    /// Read and parse the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, CliError> {
        serde_json::from_str(text).map_err(|source| CliError::Manifest {
            path: path.to_owned(),
            source,
        })
    }

    /// Decode the ruler templates and logo.
    ///
    /// An asset that cannot be read is left out of the bundle with a
    /// warning: a missing logo is then skipped by every artifact, and a
    /// missing template fails only the artifacts that select its size.
    pub fn assets(&self, base: &Path) -> AssetBundle {
        let mut bundle = AssetBundle::new();
        for (&size, path) in &self.rulers {
            match read_image(&base.join(path)) {
                Ok(image) => bundle = bundle.with_ruler(size, image),
                Err(e) => tracing::warn!(ruler = %size, error = %e, "ruler template unavailable"),
            }
        }
        if let Some(path) = &self.logo {
            match read_image(&base.join(path)) {
                Ok(image) => bundle = bundle.with_logo(image),
                Err(e) => tracing::warn!(error = %e, "logo unavailable"),
            }
        }
        tracing::debug!(rulers = self.rulers.len(), logo = self.logo.is_some(), "assets loaded");
        bundle
    }
}

impl ArtifactEntry {
    /// Decode every photo and assemble the pipeline input.
    pub fn load(&self, base: &Path) -> Result<ArtifactInput, CliError> {
        let assignment = |source| CliError::Assignment {
            id: self.id.clone(),
            source,
        };

        let mut views = SideAssignments::new();
        for (&role, path) in &self.views {
            views
                .insert(ViewSlot::Primary(role), read_image(&base.join(path))?)
                .map_err(assignment)?;
        }
        for strip in &self.extended {
            for path in &strip.photos {
                views.push_extended(strip.anchor, strip.direction, read_image(&base.join(path))?);
            }
        }
        for (&side, &anchor) in &self.attachments {
            views.attach(side, anchor);
        }

        let mut input = ArtifactInput::new(&self.id, views)
            .with_ruler_edge(self.ruler_edge)
            .with_background(self.background);
        if let Some(role) = self.scale_view {
            input = input.with_scale_view(role);
        }
        for (&role, &hint) in &self.background_overrides {
            input = input.with_view_background(ViewSlot::Primary(role), hint);
        }
        tracing::debug!(artifact = %self.id, views = input.views.len(), "artifact loaded");
        Ok(input)
    }

    /// Number of photo files this entry names.
    pub fn photo_count(&self) -> usize {
        self.views.len() + self.extended.iter().map(|s| s.photos.len()).sum::<usize>()
    }
}

fn read_image(path: &Path) -> Result<RgbaImage, CliError> {
    let bytes = std::fs::read(path).map_err(|source| CliError::Read {
        path: path.to_owned(),
        source,
    })?;
    stele_pipeline::decode(&bytes).map_err(|source| CliError::Decode {
        path: path.to_owned(),
        source,
    })
}
