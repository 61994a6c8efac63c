//! Interactive preview of grown strands and their extracted surface,
//! built with eframe/egui.
//!
//! This module defines [`Viewer`], which owns the skeleton, the pipeline
//! configuration and the output of the last run, and implements
//! [`eframe::App`] to draw an orthographic projection of the meshes.

use std::time::Instant;

use eframe::App;
use glam::{Mat3, Vec2, Vec3};
use rand::Rng;
use strand_core::{
    config::{ModelConfig, PipelineConfig},
    mesh::{LineMesh, TriangleMesh},
    phases::{self, RunOutput},
    skeleton::Skeleton,
};
use tracing::{error, info};

/// Model presets offered by the config panel, each with a threshold that
/// yields a visible surface at the default grid scale.
const MODEL_PRESETS: [(&str, ModelConfig, f32); 3] = [
    (
        "Metaballs",
        ModelConfig::Metaballs {
            max_val: 1.0,
            range: 0.12,
        },
        0.5,
    ),
    (
        "Blinn",
        ModelConfig::Blinn {
            radius: 0.05,
            blobiness: -2.0,
            cutoff_val: 0.05,
        },
        0.5,
    ),
    (
        "Convolution",
        ModelConfig::Convolution {
            sharpness: 30.0,
            cutoff: 0.12,
        },
        0.015,
    ),
];

/// Main application state for the interactive viewer.
///
/// [`Viewer`] glues together:
/// - The pipeline inputs: [`Skeleton`] and [`PipelineConfig`].
/// - The output of the last [`phases::run`], including the grid so the
///   field and surface can be rebuilt without regrowing.
/// - Camera state (yaw/pitch, pan/zoom) and layer toggles.
///
/// ### Fields
/// - `skeleton` - Shoot and root trees strands are grown along.
/// - `cfg` - Pipeline configuration edited through the side panel.
/// - `output` - Result of the last successful run.
/// - `last_error` - Message of the last failed run or rebuild.
///
/// - `randomize_seed` - Pick a fresh seed on every regrow.
/// - `yaw`, `pitch` - View rotation in radians.
/// - `zoom` - Pixels per world unit.
/// - `pan` - Screen-space pan offset in pixels.
pub struct Viewer {
    skeleton: Skeleton,
    cfg: PipelineConfig,
    output: Option<RunOutput>,
    last_error: Option<String>,

    randomize_seed: bool,
    show_skeleton: bool,
    show_strands: bool,
    show_surface: bool,

    yaw: f32,
    pitch: f32,
    zoom: f32,
    pan: egui::Vec2,
    focus: Vec3,

    last_run_secs: f64,
}

impl Viewer {
    /// Creates a viewer for `skeleton` and runs the pipeline once.
    ///
    /// The camera is centered on the skeleton bounds and zoomed so the
    /// skeleton spans roughly 400 pixels.
    pub fn new(skeleton: Skeleton, cfg: PipelineConfig) -> Self {
        let stats = skeleton.stats();
        let extent = stats.size().max_element().max(1e-3);
        let mut viewer = Self {
            randomize_seed: cfg.growth.seed.is_none(),
            skeleton,
            cfg,
            output: None,
            last_error: None,
            show_skeleton: true,
            show_strands: true,
            show_surface: true,
            yaw: 0.5,
            pitch: 0.25,
            zoom: 400.0 / extent,
            pan: egui::vec2(0.0, 0.0),
            focus: stats.center(),
            last_run_secs: 0.0,
        };
        viewer.regrow();
        viewer
    }

    /// Reruns the whole pipeline: new grid, new strands, new surface.
    fn regrow(&mut self) {
        if self.randomize_seed {
            self.cfg.growth.seed = Some(rand::rng().random());
        }
        let start = Instant::now();
        match phases::run(&self.skeleton, &self.cfg) {
            Ok(out) => {
                self.cfg.growth.seed = Some(out.seed);
                self.output = Some(out);
                self.last_error = None;
            }
            Err(e) => {
                error!(error = %e, "run failed");
                self.last_error = Some(e.to_string());
            }
        }
        self.last_run_secs = start.elapsed().as_secs_f64();
        info!(secs = self.last_run_secs, "regrow finished");
    }

    /// Re-registers the field sources of the current strands with the
    /// current model, then re-extracts the surface.
    fn rebuild_field(&mut self) {
        let Some(out) = self.output.as_mut() else {
            return;
        };
        out.grid.clear_field();
        match phases::field_phase(&mut out.grid, &self.skeleton, &out.strands, &self.cfg.field) {
            Ok(_) => {
                out.surface = phases::surface_phase(&mut out.grid, &self.cfg.field);
                self.last_error = None;
            }
            Err(e) => {
                error!(error = %e, "field rebuild failed");
                out.surface = TriangleMesh::new();
                self.last_error = Some(e.to_string());
            }
        }
    }

    /// Re-extracts the surface at the current threshold and colour.
    fn resurface(&mut self) {
        if let Some(out) = self.output.as_mut() {
            out.surface = phases::surface_phase(&mut out.grid, &self.cfg.field);
        }
    }

    /// Centers the camera on the bounds of the current meshes and zooms so
    /// they span roughly 400 pixels.
    fn fit_view(&mut self) {
        let Some(out) = &self.output else {
            return;
        };
        let bounds = [
            out.skeleton_mesh.bounds(),
            out.strand_mesh.bounds(),
            out.surface.bounds(),
        ]
        .into_iter()
        .flatten()
        .reduce(|(lo, hi), (l, h)| (lo.min(l), hi.max(h)));
        let Some((lo, hi)) = bounds else {
            return;
        };

        self.focus = (lo + hi) * 0.5;
        self.zoom = (400.0 / (hi - lo).max_element().max(1e-3)).clamp(10.0, 5000.0);
        self.pan = egui::Vec2::ZERO;
    }

    fn view_rotation(&self) -> Mat3 {
        Mat3::from_rotation_x(self.pitch) * Mat3::from_rotation_y(self.yaw)
    }

    /// Rotates `p` into view space. `x`/`y` are the projected plane,
    /// `z` grows toward the viewer.
    fn to_view(&self, p: Vec3, rot: &Mat3) -> Vec3 {
        *rot * (p - self.focus)
    }

    /// Converts a projected position to screen-space.
    ///
    /// Projected coordinates are scaled by `zoom`, offset by `pan`, and then
    /// centered inside the given `rect`. The y-axis is flipped so that
    /// positive y goes up.
    ///
    /// ### Parameters
    /// - `p` - Projected (view-plane) position.
    /// - `rect` - Screen-space rectangle representing the drawing area.
    ///
    /// ### Returns
    /// The corresponding egui position in screen-space.
    fn world_to_screen(&self, p: Vec2, rect: egui::Rect) -> egui::Pos2 {
        let center = rect.center();
        egui::pos2(
            center.x + p.x * self.zoom + self.pan.x,
            center.y - p.y * self.zoom + self.pan.y,
        )
    }

    /// Inverse of [`Viewer::world_to_screen`] (up to floating point
    /// rounding), using the same `zoom`, `pan`, and `rect` center.
    fn screen_to_world(&self, p: egui::Pos2, rect: egui::Rect) -> Vec2 {
        let center = rect.center();
        let x = (p.x - center.x - self.pan.x) / self.zoom;
        let y = (center.y - p.y + self.pan.y) / self.zoom;
        Vec2::new(x, y)
    }

    /// Helper to draw a labeled `usize` [`egui::DragValue`].
    fn labeled_drag_usize(
        ui: &mut egui::Ui,
        label: &str,
        value: &mut usize,
        range: std::ops::RangeInclusive<usize>,
        speed: f64,
    ) {
        ui.horizontal(|ui| {
            ui.label(label);
            ui.add(egui::DragValue::new(value).range(range).speed(speed));
        });
    }

    /// Helper to draw a labeled `f32` [`egui::DragValue`].
    fn labeled_drag_f32(
        ui: &mut egui::Ui,
        label: &str,
        value: &mut f32,
        range: std::ops::RangeInclusive<f32>,
        speed: f64,
    ) {
        ui.horizontal(|ui| {
            ui.label(label);
            ui.add(egui::DragValue::new(value).range(range).speed(speed));
        });
    }

    /// Builds the top panel UI (run controls, layers, zoom).
    fn ui_top_panel(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("⟳ Regrow").clicked() {
                    self.regrow();
                }
                ui.checkbox(&mut self.randomize_seed, "random seed");

                ui.separator();
                if ui.button("Rebuild field").clicked() {
                    self.rebuild_field();
                }
                if ui.button("Resurface").clicked() {
                    self.resurface();
                }

                ui.separator();
                ui.checkbox(&mut self.show_skeleton, "skeleton");
                ui.checkbox(&mut self.show_strands, "strands");
                ui.checkbox(&mut self.show_surface, "surface");

                ui.separator();
                if ui.button("Fit").clicked() {
                    self.fit_view();
                }
                ui.add(egui::Slider::new(&mut self.zoom, 10.0..=5000.0).logarithmic(true).text("Zoom"));
            });
        });
    }

    /// Builds the bottom status bar (run statistics and last error).
    fn ui_status_bar(&self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(format!("run = {:.3} s", self.last_run_secs));
                if let Some(out) = &self.output {
                    ui.label(format!("seed = {}", out.seed));
                    ui.separator();
                    ui.label(format!("triangles = {}", out.surface.triangle_count()));
                    ui.label(format!("stalled = {}", out.report.stalled));
                    ui.label(format!("strands = {}", out.report.grown));
                    ui.label(format!("grid = {}", out.grid.dimensions()));
                }
                if let Some(err) = &self.last_error {
                    ui.separator();
                    ui.colored_label(egui::Color32::LIGHT_RED, err);
                }
            });
        });
    }

    /// Builds the right-hand configuration panel for pipeline parameters.
    fn ui_config_panel(&mut self, ctx: &egui::Context) {
        egui::SidePanel::right("config_panel")
            .resizable(true)
            .default_width(240.0)
            .show(ctx, |ui| {
                ui.heading("Config");

                ui.separator();
                ui.label("Grid (regrow to apply)");
                Self::labeled_drag_f32(ui, "scale:", &mut self.cfg.grid.scale, 0.005..=1.0, 0.001);
                Self::labeled_drag_f32(ui, "margin:", &mut self.cfg.grid.margin, 0.0..=2.0, 0.01);

                ui.separator();
                ui.label("Growth (regrow to apply)");
                let growth = &mut self.cfg.growth;
                Self::labeled_drag_usize(ui, "strand_count:", &mut growth.strand_count, 0..=2000, 1.0);
                Self::labeled_drag_f32(
                    ui,
                    "segment_length:",
                    &mut growth.segment_length,
                    0.001..=1.0,
                    0.001,
                );
                Self::labeled_drag_usize(ui, "num_trials:", &mut growth.num_trials, 1..=128, 1.0);
                Self::labeled_drag_f32(
                    ui,
                    "max_angle_degrees:",
                    &mut growth.max_angle_degrees,
                    1.0..=180.0,
                    0.5,
                );
                Self::labeled_drag_f32(ui, "alpha:", &mut growth.alpha, 0.0..=1.0, 0.01);
                Self::labeled_drag_f32(
                    ui,
                    "start_spread:",
                    &mut growth.start_spread,
                    0.0..=0.5,
                    0.001,
                );

                ui.separator();
                ui.label("Field (rebuild to apply)");
                ui.horizontal(|ui| {
                    for (name, preset, threshold) in MODEL_PRESETS {
                        let selected = std::mem::discriminant(&self.cfg.field.model)
                            == std::mem::discriminant(&preset);
                        if ui.selectable_label(selected, name).clicked() && !selected {
                            self.cfg.field.model = preset;
                            self.cfg.field.threshold = threshold;
                        }
                    }
                });
                match &mut self.cfg.field.model {
                    ModelConfig::Metaballs { max_val, range } => {
                        Self::labeled_drag_f32(ui, "max_val:", max_val, 0.01..=10.0, 0.01);
                        Self::labeled_drag_f32(ui, "range:", range, 0.001..=1.0, 0.001);
                    }
                    ModelConfig::Blinn {
                        radius,
                        blobiness,
                        cutoff_val,
                    } => {
                        Self::labeled_drag_f32(ui, "radius:", radius, 0.001..=1.0, 0.001);
                        Self::labeled_drag_f32(ui, "blobiness:", blobiness, -20.0..=-0.01, 0.05);
                        Self::labeled_drag_f32(ui, "cutoff_val:", cutoff_val, 0.001..=0.999, 0.001);
                    }
                    ModelConfig::Convolution { sharpness, cutoff } => {
                        Self::labeled_drag_f32(ui, "sharpness:", sharpness, 0.1..=200.0, 0.1);
                        Self::labeled_drag_f32(ui, "cutoff:", cutoff, 0.001..=1.0, 0.001);
                    }
                }
                Self::labeled_drag_usize(ui, "overshoot:", &mut self.cfg.field.overshoot, 1..=16, 0.1);
                ui.checkbox(&mut self.cfg.field.include_skeleton, "include skeleton");

                ui.separator();
                ui.label("Surface (resurface to apply)");
                Self::labeled_drag_f32(ui, "threshold:", &mut self.cfg.field.threshold, 0.0..=10.0, 0.001);
                ui.horizontal(|ui| {
                    ui.label("color:");
                    ui.color_edit_button_rgb(&mut self.cfg.field.surface_color);
                });

                ui.separator();
                if ui.button("Reset cfg to default").clicked() {
                    self.cfg = PipelineConfig::default();
                }
            });
    }

    fn draw_lines(&self, painter: &egui::Painter, rect: egui::Rect, rot: &Mat3, mesh: &LineMesh) {
        for pair in mesh.indices.chunks_exact(2) {
            let a = &mesh.vertices[pair[0] as usize];
            let b = &mesh.vertices[pair[1] as usize];
            let pa = self.world_to_screen(self.to_view(a.position, rot).truncate(), rect);
            let pb = self.world_to_screen(self.to_view(b.position, rot).truncate(), rect);
            painter.line_segment([pa, pb], egui::Stroke::new(1.0, to_color32(a.color)));
        }
    }

    /// Draws the surface back to front with two-sided Lambert shading.
    fn draw_surface(&self, painter: &egui::Painter, rect: egui::Rect, rot: &Mat3, mesh: &TriangleMesh) {
        let light = Vec3::new(0.3, 0.5, 1.0).normalize();

        let mut order: Vec<(f32, usize)> = mesh
            .indices
            .chunks_exact(3)
            .enumerate()
            .map(|(t, tri)| {
                let depth: f32 = tri
                    .iter()
                    .map(|&i| self.to_view(mesh.vertices[i as usize].position, rot).z)
                    .sum();
                (depth, t)
            })
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut shape = egui::Mesh::default();
        for (_, t) in order {
            let base = shape.vertices.len() as u32;
            for &i in &mesh.indices[t * 3..t * 3 + 3] {
                let v = &mesh.vertices[i as usize];
                let pos = self.world_to_screen(self.to_view(v.position, rot).truncate(), rect);
                let shade = 0.25 + 0.75 * (*rot * v.normal).dot(light).abs();
                shape.colored_vertex(pos, to_color32(v.color * shade));
            }
            shape.add_triangle(base, base + 1, base + 2);
        }
        painter.add(egui::Shape::mesh(shape));
    }

    /// Builds the central panel where the meshes are drawn.
    ///
    /// Primary drag orbits the camera, secondary drag pans, and the scroll
    /// wheel zooms around the cursor.
    fn ui_central_panel(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let response = ui.allocate_response(ui.available_size(), egui::Sense::click_and_drag());
            let rect = response.rect;
            let painter = ui.painter_at(rect);

            if response.dragged_by(egui::PointerButton::Primary) {
                let delta = response.drag_delta();
                self.yaw += delta.x * 0.01;
                self.pitch = (self.pitch + delta.y * 0.01).clamp(-1.5, 1.5);
            }
            if response.dragged_by(egui::PointerButton::Secondary) {
                self.pan += response.drag_delta();
            }

            // Zoom around the mouse cursor.
            let scroll = ui.ctx().input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                let pointer_screen = response.hover_pos().unwrap_or(rect.center());
                let world_before = self.screen_to_world(pointer_screen, rect);

                let factor = (1.0 + scroll * 0.001).clamp(0.5, 2.0);
                self.zoom = (self.zoom * factor).clamp(10.0, 5000.0);

                let screen_after = self.world_to_screen(world_before, rect);
                self.pan += pointer_screen - screen_after;
            }

            let Some(out) = &self.output else {
                return;
            };
            let rot = self.view_rotation();

            if self.show_surface {
                self.draw_surface(&painter, rect, &rot, &out.surface);
            }
            if self.show_strands {
                self.draw_lines(&painter, rect, &rot, &out.strand_mesh);
            }
            if self.show_skeleton {
                self.draw_lines(&painter, rect, &rot, &out.skeleton_mesh);
            }
        });
    }
}

fn to_color32(c: Vec3) -> egui::Color32 {
    let c = (c.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
    egui::Color32::from_rgb(c.x as u8, c.y as u8, c.z as u8)
}

impl App for Viewer {
    /// eframe callback that builds all UI panels for each frame.
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.ui_top_panel(ctx);
        self.ui_status_bar(ctx);
        self.ui_config_panel(ctx);
        self.ui_central_panel(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::demo_skeleton;
    use strand_core::config::GridConfig;

    fn test_rect() -> egui::Rect {
        egui::Rect::from_min_size(egui::Pos2::new(0.0, 0.0), egui::vec2(800.0, 600.0))
    }

    /// Small, seeded configuration so each test run stays fast.
    fn test_viewer() -> Viewer {
        let mut cfg = PipelineConfig::default();
        cfg.grid = GridConfig {
            scale: 0.1,
            ..GridConfig::default()
        };
        cfg.growth.strand_count = 6;
        cfg.growth.seed = Some(5);
        cfg.field.model = ModelConfig::Metaballs {
            max_val: 1.0,
            range: 0.3,
        };
        Viewer::new(demo_skeleton().unwrap(), cfg)
    }

    #[test]
    fn world_to_screen_and_back_is_roundtrip() {
        let mut viewer = test_viewer();
        // Use non-trivial zoom and pan to exercise the math.
        viewer.zoom = 2.0;
        viewer.pan = egui::vec2(15.0, -7.0);
        let rect = test_rect();

        let eps = 1e-5;
        for p in [Vec2::new(0.0, 0.0), Vec2::new(10.0, -5.0), Vec2::new(-3.5, 8.25)] {
            let screen = viewer.world_to_screen(p, rect);
            let back = viewer.screen_to_world(screen, rect);

            assert!(
                (back.x - p.x).abs() < eps && (back.y - p.y).abs() < eps,
                "roundtrip mismatch: p={:?}, back={:?}",
                p,
                back
            );
        }
    }

    #[test]
    fn unrotated_view_projects_onto_xy() {
        let mut viewer = test_viewer();
        viewer.yaw = 0.0;
        viewer.pitch = 0.0;
        viewer.focus = Vec3::ZERO;

        let v = viewer.to_view(Vec3::new(1.0, 2.0, 3.0), &viewer.view_rotation());
        assert!((v - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-6);
    }

    #[test]
    fn new_runs_the_pipeline_with_the_given_seed() {
        let viewer = test_viewer();
        assert!(viewer.last_error.is_none());
        assert!(!viewer.randomize_seed);

        let out = viewer.output.as_ref().unwrap();
        assert_eq!(out.seed, 5);
        assert_eq!(out.report.grown, 6);
        assert!(!out.surface.is_empty());
    }

    #[test]
    fn regrow_with_fixed_seed_repeats_the_run() {
        let mut viewer = test_viewer();
        let before = viewer.output.as_ref().unwrap().strands.clone();

        viewer.regrow();
        assert_eq!(viewer.output.as_ref().unwrap().strands, before);
    }

    #[test]
    fn higher_threshold_shrinks_the_surface() {
        let mut viewer = test_viewer();
        let before = viewer.output.as_ref().unwrap().surface.triangle_count();

        viewer.cfg.field.threshold = 2.0;
        viewer.resurface();
        let after = viewer.output.as_ref().unwrap().surface.triangle_count();
        assert!(after < before);
    }

    #[test]
    fn rebuild_field_reports_invalid_models() {
        let mut viewer = test_viewer();
        viewer.cfg.field.model = ModelConfig::Blinn {
            radius: 0.1,
            blobiness: 1.0,
            cutoff_val: 0.5,
        };
        viewer.rebuild_field();
        assert!(viewer.last_error.is_some());
        assert!(viewer.output.as_ref().unwrap().surface.is_empty());

        // Switching back to a valid model recovers.
        viewer.cfg.field.model = ModelConfig::Metaballs {
            max_val: 1.0,
            range: 0.3,
        };
        viewer.rebuild_field();
        assert!(viewer.last_error.is_none());
        assert!(!viewer.output.as_ref().unwrap().surface.is_empty());
    }

    #[test]
    fn failed_regrow_keeps_previous_output() {
        let mut viewer = test_viewer();
        viewer.cfg.growth.num_trials = 0;
        viewer.regrow();

        assert!(viewer.last_error.is_some());
        assert!(viewer.output.is_some());
    }

    #[test]
    fn fit_view_frames_the_meshes() {
        let mut viewer = test_viewer();
        viewer.pan = egui::vec2(40.0, -12.0);
        viewer.focus = Vec3::splat(100.0);
        viewer.fit_view();

        let out = viewer.output.as_ref().unwrap();
        let (lo, hi) = out.skeleton_mesh.bounds().unwrap();
        assert!(viewer.focus.cmpge(lo - Vec3::ONE).all() && viewer.focus.cmple(hi + Vec3::ONE).all());
        assert_eq!(viewer.pan, egui::Vec2::ZERO);
        assert!((10.0..=5000.0).contains(&viewer.zoom));
    }

    #[test]
    fn to_color32_clamps_channels() {
        assert_eq!(to_color32(Vec3::new(2.0, -1.0, 0.5)), egui::Color32::from_rgb(255, 0, 128));
    }
}
