//! HRIR store
//!
//! Holds a sparse measured HRIR table, densifies it onto a fixed
//! azimuth/elevation grid at setup, and serves partitioned HRIRs and ITDs
//! for any direction at runtime, with optional barycentric interpolation.
//!
//! Angles follow the toolkit convention: azimuth [0, 360) anticlockwise,
//! elevation [0, 360) with 90 at the zenith and 270 at the nadir. The grid
//! always contains both poles and the azimuth-360 seam is the azimuth-0
//! column.

use std::collections::BTreeMap;

use au_core::{ResultId, Sample};
use au_dsp::upc::{partition_ir_with, spectrum_len, PartitionedIr};
use au_dsp::FftProcessor;

pub const DEFAULT_RESAMPLING_STEP: i32 = 5;
pub const DEFAULT_MEASUREMENT_DISTANCE_M: f32 = 1.95;

/// Azimuth step used when filling the pole rows.
const POLE_AZIMUTH_STEP: i32 = 15;
/// Number of azimuth sectors averaged per pole.
const POLE_SECTOR_COUNT: i32 = 4;
/// Elevation span (degrees) scanned below/above a pole when averaging.
const MAX_DISTANCE_BETWEEN_ELEVATIONS: i32 = 5;
/// Angular seam of the sphere.
const SPHERE_BORDER: f32 = 360.0;
const EPSILON_SEWING: f32 = 0.001;

/// One measured HRIR pair with its per-ear onset delays (samples).
#[derive(Debug, Clone, Default)]
pub struct HrirEntry {
    pub left_delay: f32,
    pub right_delay: f32,
    pub left: Vec<Sample>,
    pub right: Vec<Sample>,
}

/// A resampled grid cell: per-ear delays and partitioned spectra.
#[derive(Debug, Clone, Default)]
pub struct PartitionedHrir {
    pub left_delay: f32,
    pub right_delay: f32,
    pub left: PartitionedIr,
    pub right: PartitionedIr,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Barycentric {
    alpha: f32,
    beta: f32,
    gamma: f32,
}

impl Barycentric {
    const INVALID: Barycentric = Barycentric {
        alpha: -1.0,
        beta: -1.0,
        gamma: -1.0,
    };

    fn is_valid(&self) -> bool {
        self.alpha >= 0.0 && self.beta >= 0.0 && self.gamma >= 0.0
    }
}

/// Compute barycentric coordinates of (x, y) in the triangle
/// (x1,y1)-(x2,y2)-(x3,y3); coefficients are truncated to three decimals and
/// degenerate triangles are rejected.
fn barycentric_coordinates(
    x: f32,
    y: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    x3: f32,
    y3: f32,
) -> Barycentric {
    let denominator = (y2 - y3) * (x1 - x3) + (x3 - x2) * (y1 - y3);
    if denominator.round() == 0.0 {
        return Barycentric::INVALID;
    }
    let trunc3 = |v: f32| (1000.0 * v).trunc() / 1000.0;
    let alpha = trunc3(((y2 - y3) * (x - x3) + (x3 - x2) * (y - y3)) / denominator);
    let beta = trunc3(((y3 - y1) * (x - x3) + (x1 - x3) * (y - y3)) / denominator);
    let gamma = trunc3(1.0 - alpha - beta);
    Barycentric { alpha, beta, gamma }
}

/// Angular distance on the sphere by the haversine formula (radians).
fn haversine_distance(az1: f32, el1: f32, az2: f32, el2: f32) -> f32 {
    let d_az = (az1 - az2).to_radians();
    let d_el = (el1 - el2).to_radians();
    let term1 = (d_el / 2.0).sin().powi(2);
    let term4 = (d_az / 2.0).sin().powi(2);
    let root = term1 + el1.to_radians().cos() * el2.to_radians().cos() * term4;
    root.max(0.0).sqrt().clamp(-1.0, 1.0).asin()
}

/// Unwrap an azimuth so the orientation of interest sits at 180 degrees.
fn transform_azimuth(target: f32, original: f32) -> f32 {
    let mut az = original + 180.0 - target;
    if az >= 360.0 {
        az %= 360.0;
    }
    if az < 0.0 {
        az += 360.0;
    }
    az
}

/// Fold elevations at or above the nadir into the negative range.
fn transform_elevation(original: f32) -> f32 {
    if original >= 270.0 {
        original - 360.0
    } else {
        original
    }
}

/// Resampled table: an ordered grid indexed by quantized azimuth row and
/// elevation column (0..=90 then 270..360, in grid steps).
#[derive(Debug, Default)]
struct ResampledGrid {
    step: i32,
    cells: Vec<Vec<Option<PartitionedHrir>>>,
}

impl ResampledGrid {
    fn new(step: i32) -> Self {
        let az_rows = (360 / step) as usize;
        let el_cols = (90 / step + 1) as usize + (90 / step) as usize;
        Self {
            step,
            cells: vec![vec![None; el_cols]; az_rows],
        }
    }

    fn elevation_index(&self, elevation: i32) -> Option<usize> {
        if elevation % self.step != 0 {
            return None;
        }
        if (0..=90).contains(&elevation) {
            Some((elevation / self.step) as usize)
        } else if (270..360).contains(&elevation) {
            Some((90 / self.step + 1 + (elevation - 270) / self.step) as usize)
        } else {
            None
        }
    }

    fn get(&self, azimuth: i32, elevation: i32) -> Option<&PartitionedHrir> {
        let azimuth = azimuth.rem_euclid(360);
        let elevation = elevation.rem_euclid(360);
        if azimuth % self.step != 0 {
            return None;
        }
        let row = (azimuth / self.step) as usize;
        let col = self.elevation_index(elevation)?;
        self.cells.get(row)?.get(col)?.as_ref()
    }

    fn insert(&mut self, azimuth: i32, elevation: i32, value: PartitionedHrir) {
        let azimuth = azimuth.rem_euclid(360);
        if azimuth % self.step != 0 {
            return;
        }
        let row = (azimuth / self.step) as usize;
        if let Some(col) = self.elevation_index(elevation.rem_euclid(360)) {
            self.cells[row][col] = Some(value);
        }
    }

    fn clear(&mut self) {
        for row in &mut self.cells {
            for cell in row.iter_mut() {
                *cell = None;
            }
        }
    }
}

/// Which ear of a grid cell a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEar {
    Left,
    Right,
}

#[derive(Debug)]
pub struct HrirStore {
    hrir_length: usize,
    block_size: usize,
    measurement_distance: f32,
    resampling_step: i32,
    num_subfilters: usize,
    setup_in_progress: bool,
    loaded: bool,
    raw: BTreeMap<(i32, i32), HrirEntry>,
    grid: ResampledGrid,
}

impl HrirStore {
    pub fn new(block_size: usize) -> Self {
        Self {
            hrir_length: 0,
            block_size,
            measurement_distance: DEFAULT_MEASUREMENT_DISTANCE_M,
            resampling_step: DEFAULT_RESAMPLING_STEP,
            num_subfilters: 0,
            setup_in_progress: false,
            loaded: false,
            raw: BTreeMap::new(),
            grid: ResampledGrid::new(DEFAULT_RESAMPLING_STEP),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_setup_in_progress(&self) -> bool {
        self.setup_in_progress
    }

    pub fn hrir_length(&self) -> usize {
        self.hrir_length
    }

    pub fn measurement_distance(&self) -> f32 {
        self.measurement_distance
    }

    pub fn resampling_step(&self) -> i32 {
        self.resampling_step
    }

    pub fn set_resampling_step(&mut self, step: i32) {
        self.resampling_step = step.clamp(1, 90);
    }

    /// Number of subfilters of every partitioned HRIR.
    pub fn num_subfilters(&self) -> usize {
        self.num_subfilters
    }

    /// Interleaved length of one subfilter spectrum.
    pub fn subfilter_len(&self) -> usize {
        spectrum_len(self.block_size)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn raw_table(&self) -> &BTreeMap<(i32, i32), HrirEntry> {
        &self.raw
    }

    // ---- Build protocol ------------------------------------------------------

    pub fn begin_setup(&mut self, hrir_length: usize, measurement_distance: f32) {
        self.hrir_length = hrir_length;
        self.measurement_distance = measurement_distance;
        self.raw.clear();
        self.grid = ResampledGrid::new(self.resampling_step);
        self.setup_in_progress = true;
        self.loaded = false;
        self.num_subfilters = hrir_length.div_ceil(self.block_size).max(1);
    }

    pub fn add_hrir(&mut self, azimuth: f32, elevation: f32, entry: HrirEntry) {
        if !self.setup_in_progress {
            au_core::report!(
                ResultId::NotAllowed,
                "AddHRIR called outside BeginSetup/EndSetup",
                "call BeginSetup first"
            );
            return;
        }
        if entry.left.len() != self.hrir_length || entry.right.len() != self.hrir_length {
            au_core::report!(
                ResultId::BadSize,
                "HRIR length differs from the one given at BeginSetup"
            );
            return;
        }
        let key = (azimuth.round() as i32, elevation.round() as i32);
        if self.raw.insert(key, entry).is_some() {
            au_core::report!(
                ResultId::Warning,
                "HRIR for this orientation replaced an existing entry"
            );
        }
    }

    pub fn add_table(&mut self, table: BTreeMap<(i32, i32), HrirEntry>) {
        if self.setup_in_progress {
            self.raw = table;
        }
    }

    /// Finish setup: common-delay removal, pole filling, seam column, grid
    /// resampling and partitioning.
    pub fn end_setup(&mut self) -> bool {
        if !self.setup_in_progress {
            return false;
        }
        if self.raw.is_empty() {
            au_core::report!(
                ResultId::NotSet,
                "the measured HRIR table is empty",
                "add at least one HRIR before EndSetup"
            );
            return false;
        }

        self.remove_common_delay();
        self.fill_poles();
        self.copy_seam_column();
        self.resample();

        self.setup_in_progress = false;
        self.loaded = true;
        log::debug!(
            "HRIR grid resampled: {} measured entries, step {} deg, {} subfilters",
            self.raw.len(),
            self.resampling_step,
            self.num_subfilters
        );
        true
    }

    /// Reset to the unloaded state, keeping configuration.
    pub fn reset(&mut self) {
        self.setup_in_progress = false;
        self.loaded = false;
        self.raw.clear();
        self.grid.clear();
        self.hrir_length = 0;
        self.num_subfilters = 0;
    }

    /// Rebuild the grid tables after a block-size or step change. The raw
    /// measured table is kept.
    pub fn rebuild(&mut self, block_size: usize) {
        if self.raw.is_empty() {
            self.block_size = block_size;
            return;
        }
        self.block_size = block_size;
        self.num_subfilters = self.hrir_length.div_ceil(block_size).max(1);
        self.grid = ResampledGrid::new(self.resampling_step);
        self.setup_in_progress = true;
        self.loaded = false;
        self.resample();
        self.setup_in_progress = false;
        self.loaded = true;
    }

    /// Subtract the minimum onset delay across the table, per ear. The two
    /// ears are corrected independently to compensate measurement asymmetry.
    fn remove_common_delay(&mut self) {
        let mut min_left = f32::MAX;
        let mut min_right = f32::MAX;
        for entry in self.raw.values() {
            min_left = min_left.min(entry.left_delay);
            min_right = min_right.min(entry.right_delay);
        }
        if min_left > 0.0 || min_right > 0.0 {
            for entry in self.raw.values_mut() {
                entry.left_delay -= min_left;
                entry.right_delay -= min_right;
            }
        }
    }

    /// Average the measured ring(s) nearest a pole, with the azimuth circle
    /// split into equally weighted sectors.
    fn hemisphere_pole_average(&self, keys: &[(i32, i32)]) -> HrirEntry {
        let border = (360.0f32 / POLE_SECTOR_COUNT as f32).ceil() as i32;
        let mut parts: Vec<Vec<(i32, i32)>> = vec![Vec::new(); POLE_SECTOR_COUNT as usize];

        let mut current_elevation = keys.first().map(|k| k.1).unwrap_or(0);
        let first_elevation = current_elevation;
        for key in keys {
            if key.1 != current_elevation {
                if parts.iter().all(|p| !p.is_empty()) {
                    break;
                }
                current_elevation = key.1;
                // Hemisphere elevations are sorted pole-first; give up once
                // the scan leaves the allowed span around the first ring.
                if (current_elevation - first_elevation).abs() > MAX_DISTANCE_BETWEEN_ELEVATIONS {
                    break;
                }
            }
            let sector = (key.0 / border).clamp(0, POLE_SECTOR_COUNT - 1) as usize;
            // Inclusive lower edge only: azimuth `border * j` belongs to part j.
            if key.0 >= border * sector as i32 && key.0 < border * (sector as i32 + 1) {
                parts[sector].push(*key);
            }
        }

        let mut result = HrirEntry {
            left_delay: 0.0,
            right_delay: 0.0,
            left: vec![0.0; self.hrir_length],
            right: vec![0.0; self.hrir_length],
        };
        let part_weight = 1.0 / POLE_SECTOR_COUNT as f32;
        for part in &parts {
            if part.is_empty() {
                continue;
            }
            let scale = 1.0 / part.len() as f32;
            let mut part_left = vec![0.0f32; self.hrir_length];
            let mut part_right = vec![0.0f32; self.hrir_length];
            let mut part_left_delay = 0.0;
            let mut part_right_delay = 0.0;
            for key in part {
                let entry = &self.raw[key];
                part_left_delay += entry.left_delay;
                part_right_delay += entry.right_delay;
                for i in 0..self.hrir_length {
                    part_left[i] += entry.left[i];
                    part_right[i] += entry.right[i];
                }
            }
            result.left_delay += part_weight * scale * part_left_delay;
            result.right_delay += part_weight * scale * part_right_delay;
            for i in 0..self.hrir_length {
                result.left[i] += part_weight * scale * part_left[i];
                result.right[i] += part_weight * scale * part_right[i];
            }
        }
        result.left_delay = result.left_delay.round();
        result.right_delay = result.right_delay.round();
        result
    }

    /// Ensure both poles exist, then replicate them over the pole rows.
    fn fill_poles(&mut self) {
        let north = match self.raw.get(&(0, 90)) {
            Some(entry) => entry.clone(),
            None => {
                let mut keys: Vec<(i32, i32)> = self
                    .raw
                    .keys()
                    .copied()
                    .filter(|k| k.1 < 90)
                    .collect();
                keys.sort_by(|a, b| b.1.cmp(&a.1));
                self.hemisphere_pole_average(&keys)
            }
        };
        let south = match self.raw.get(&(0, 270)) {
            Some(entry) => entry.clone(),
            None => {
                let mut keys: Vec<(i32, i32)> = self
                    .raw
                    .keys()
                    .copied()
                    .filter(|k| k.1 > 270)
                    .collect();
                keys.sort_by(|a, b| a.1.cmp(&b.1));
                self.hemisphere_pole_average(&keys)
            }
        };

        let mut azimuth = 0;
        while azimuth < 360 {
            self.raw.entry((azimuth, 90)).or_insert_with(|| north.clone());
            self.raw.entry((azimuth, 270)).or_insert_with(|| south.clone());
            azimuth += POLE_AZIMUTH_STEP;
        }
    }

    /// The azimuth-360 column equals azimuth 0 for every elevation.
    fn copy_seam_column(&mut self) {
        let seam: Vec<(i32, HrirEntry)> = self
            .raw
            .iter()
            .filter(|((az, _), _)| *az == 0)
            .map(|((_, el), entry)| (*el, entry.clone()))
            .collect();
        for (el, entry) in seam {
            self.raw.entry((360, el)).or_insert(entry);
        }
    }

    /// Offline barycentric interpolation from the three nearest measured
    /// orientations, in the unwrapped coordinate frame.
    fn interpolate_offline(&self, azimuth: i32, elevation: i32) -> HrirEntry {
        let mut sorted: Vec<((i32, i32), f32)> = self
            .raw
            .keys()
            .map(|k| {
                (
                    *k,
                    haversine_distance(
                        azimuth as f32,
                        elevation as f32,
                        k.0 as f32,
                        k.1 as f32,
                    ),
                )
            })
            .collect();
        sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let group: Vec<(i32, i32)> = sorted.iter().map(|(k, _)| *k).collect();

        let target_az = transform_azimuth(azimuth as f32, azimuth as f32);
        let target_el = transform_elevation(elevation as f32);

        for group_size in 3..=group.len() {
            for i in 0..group_size.saturating_sub(2) {
                for j in (i + 1)..group_size.saturating_sub(1) {
                    for k in (j + 1)..group_size {
                        let t = |idx: usize| {
                            (
                                transform_azimuth(azimuth as f32, group[idx].0 as f32),
                                transform_elevation(group[idx].1 as f32),
                            )
                        };
                        let (x1, y1) = t(i);
                        let (x2, y2) = t(j);
                        let (x3, y3) = t(k);
                        let bc = barycentric_coordinates(
                            target_az, target_el, x1, y1, x2, y2, x3, y3,
                        );
                        if !bc.is_valid() {
                            continue;
                        }
                        let e1 = &self.raw[&group[i]];
                        let e2 = &self.raw[&group[j]];
                        let e3 = &self.raw[&group[k]];
                        let mut out = HrirEntry {
                            left_delay: (bc.alpha * e1.left_delay
                                + bc.beta * e2.left_delay
                                + bc.gamma * e3.left_delay)
                                .round(),
                            right_delay: (bc.alpha * e1.right_delay
                                + bc.beta * e2.right_delay
                                + bc.gamma * e3.right_delay)
                                .round(),
                            left: vec![0.0; self.hrir_length],
                            right: vec![0.0; self.hrir_length],
                        };
                        for n in 0..self.hrir_length {
                            out.left[n] =
                                bc.alpha * e1.left[n] + bc.beta * e2.left[n] + bc.gamma * e3.left[n];
                            out.right[n] = bc.alpha * e1.right[n]
                                + bc.beta * e2.right[n]
                                + bc.gamma * e3.right[n];
                        }
                        return out;
                    }
                }
            }
        }

        au_core::report!(
            ResultId::Warning,
            "no valid interpolation triangle found; using the nearest measured HRIR"
        );
        self.raw[&group[0]].clone()
    }

    fn partition_entry(&self, fft: &mut FftProcessor, entry: &HrirEntry) -> PartitionedHrir {
        PartitionedHrir {
            left_delay: entry.left_delay,
            right_delay: entry.right_delay,
            left: partition_ir_with(fft, &entry.left, self.block_size),
            right: partition_ir_with(fft, &entry.right, self.block_size),
        }
    }

    fn resample(&mut self) {
        let step = self.resampling_step;
        let mut elevations: Vec<i32> = (0..=90).step_by(step as usize).collect();
        elevations.extend((270..360).step_by(step as usize));

        // One transform plan serves the whole grid.
        let mut fft = FftProcessor::new(2 * self.block_size);

        let mut azimuth = 0;
        while azimuth < 360 {
            for &elevation in &elevations {
                let partitioned = match self.raw.get(&(azimuth, elevation)) {
                    Some(entry) => self.partition_entry(&mut fft, entry),
                    None => {
                        let interpolated = self.interpolate_offline(azimuth, elevation);
                        self.partition_entry(&mut fft, &interpolated)
                    }
                };
                self.grid.insert(azimuth, elevation, partitioned);
            }
            azimuth += step;
        }
    }

    // ---- Runtime queries -----------------------------------------------------

    fn sew_angle(mut angle: f32) -> f32 {
        if au_core::magnitudes::are_same(angle, SPHERE_BORDER, EPSILON_SEWING) {
            angle = 0.0;
        }
        angle
    }

    /// Snap to the resampling grid (interpolation off).
    fn snap_to_grid(&self, azimuth: f32, elevation: f32) -> (i32, i32) {
        let step = self.resampling_step as f32;
        let mut az = ((azimuth / step).round() * step) as i32;
        let mut el = ((elevation / step).round() * step) as i32;
        if az == 360 {
            az = 0;
        }
        if el == 360 {
            el = 0;
        }
        if el == 90 || el == 270 {
            az = 0;
        }
        (az, el)
    }

    /// The grid-cell triangle around an off-grid direction, with its
    /// barycentric coefficients.
    fn quadrant_triangle(&self, azimuth: f32, elevation: f32) -> (Barycentric, [(i32, i32); 3]) {
        let step = self.resampling_step as f32;
        let corner_az = (azimuth / step).trunc() * step;
        let corner_el = (elevation / step).trunc() * step;
        // A above C, B diagonal, D beside C; P is the cell midpoint.
        let a = (corner_az, corner_el + step);
        let b = (corner_az + step, corner_el + step);
        let c = (corner_az, corner_el);
        let d = (corner_az + step, corner_el);
        let mid_az = corner_az + step * 0.5;
        let mid_el = corner_el + step * 0.5;

        let (p1, p2, p3) = if azimuth >= mid_az {
            if elevation >= mid_el {
                (a, b, d)
            } else {
                (b, c, d)
            }
        } else if elevation >= mid_el {
            (a, b, c)
        } else {
            (a, c, d)
        };

        let bc = barycentric_coordinates(
            azimuth, elevation, p1.0, p1.1, p2.0, p2.1, p3.0, p3.1,
        );
        let to_key = |p: (f32, f32)| {
            let mut az = p.0 as i32;
            let mut el = p.1 as i32;
            if az == 360 {
                az = 0;
            }
            if el == 360 {
                el = 0;
            }
            (az, el)
        };
        (bc, [to_key(p1), to_key(p2), to_key(p3)])
    }

    /// Fetch the partitioned HRIR for one ear, optionally interpolated.
    /// `out` must hold `num_subfilters` spectra of `subfilter_len` values.
    pub fn hrir_partitioned_into(
        &self,
        ear: StoreEar,
        azimuth: f32,
        elevation: f32,
        interpolate: bool,
        out: &mut PartitionedIr,
    ) -> bool {
        if self.setup_in_progress || !self.loaded {
            au_core::report!(
                ResultId::NotSet,
                "HRIR query while the table is not ready",
                "finish EndSetup before processing"
            );
            for partition in out.iter_mut() {
                partition.fill(0.0);
            }
            return false;
        }

        let azimuth = Self::sew_angle(azimuth);
        let elevation = Self::sew_angle(elevation);

        if interpolate {
            let iel = elevation.round() as i32;
            if iel == 90 || iel == 270 {
                if let Some(cell) = self.grid.get(0, iel) {
                    copy_partitions(cell, ear, out);
                    return true;
                }
                return false;
            }
            let (bc, corners) = self.quadrant_triangle(azimuth, elevation);
            if !bc.is_valid() {
                au_core::report!(ResultId::Warning, "no interpolation triangle for direction");
                return false;
            }
            let c1 = self.grid.get(corners[0].0, corners[0].1);
            let c2 = self.grid.get(corners[1].0, corners[1].1);
            let c3 = self.grid.get(corners[2].0, corners[2].1);
            let (Some(c1), Some(c2), Some(c3)) = (c1, c2, c3) else {
                au_core::report!(ResultId::Warning, "grid corners missing for direction");
                return false;
            };
            let (p1, p2, p3) = match ear {
                StoreEar::Left => (&c1.left, &c2.left, &c3.left),
                StoreEar::Right => (&c1.right, &c2.right, &c3.right),
            };
            for (k, partition) in out.iter_mut().enumerate() {
                for (i, value) in partition.iter_mut().enumerate() {
                    *value = bc.alpha * p1[k][i] + bc.beta * p2[k][i] + bc.gamma * p3[k][i];
                }
            }
            true
        } else {
            let (az, el) = self.snap_to_grid(azimuth, elevation);
            match self.grid.get(az, el) {
                Some(cell) => {
                    copy_partitions(cell, ear, out);
                    true
                }
                None => {
                    au_core::report!(ResultId::NotSet, "HRIR not found on the resampling grid");
                    false
                }
            }
        }
    }

    /// Owned-variant convenience for setup-time callers.
    pub fn hrir_partitioned(
        &self,
        ear: StoreEar,
        azimuth: f32,
        elevation: f32,
        interpolate: bool,
    ) -> Option<PartitionedIr> {
        let mut out = vec![vec![0.0; self.subfilter_len()]; self.num_subfilters];
        self.hrir_partitioned_into(ear, azimuth, elevation, interpolate, &mut out)
            .then_some(out)
    }

    /// HRIR onset delay (samples) for one ear at a head-centred direction.
    pub fn hrir_delay(
        &self,
        ear: StoreEar,
        azimuth: f32,
        elevation: f32,
        interpolate: bool,
    ) -> f32 {
        if self.setup_in_progress || !self.loaded {
            au_core::report!(ResultId::NotSet, "HRIR delay query while the table is not ready");
            return 0.0;
        }
        let azimuth = Self::sew_angle(azimuth);
        let elevation = Self::sew_angle(elevation);
        let pick = |cell: &PartitionedHrir| match ear {
            StoreEar::Left => cell.left_delay,
            StoreEar::Right => cell.right_delay,
        };

        if interpolate {
            let iel = elevation.round() as i32;
            if iel == 90 || iel == 270 {
                return self.grid.get(0, iel).map(pick).unwrap_or(0.0);
            }
            let (bc, corners) = self.quadrant_triangle(azimuth, elevation);
            if !bc.is_valid() {
                return 0.0;
            }
            let cells = (
                self.grid.get(corners[0].0, corners[0].1),
                self.grid.get(corners[1].0, corners[1].1),
                self.grid.get(corners[2].0, corners[2].1),
            );
            if let (Some(c1), Some(c2), Some(c3)) = cells {
                (bc.alpha * pick(c1) + bc.beta * pick(c2) + bc.gamma * pick(c3)).round()
            } else {
                0.0
            }
        } else {
            let (az, el) = self.snap_to_grid(azimuth, elevation);
            self.grid.get(az, el).map(pick).unwrap_or(0.0)
        }
    }

    /// Woodworth ITD from the listener head radius, replacing the measured
    /// delay. The delay lands on the ear the sound reaches later.
    pub fn customized_delay(
        &self,
        azimuth: f32,
        elevation: f32,
        ear: StoreEar,
        head_radius_m: f32,
        sample_rate: u32,
        sound_speed: f32,
    ) -> u64 {
        let az = azimuth.to_radians();
        let el = transform_elevation(elevation).to_radians();
        let interaural_azimuth = (az.sin() * el.cos()).asin();
        let itd = head_radius_m * (interaural_azimuth + interaural_azimuth.sin()) / sound_speed;
        // Positive interaural azimuth = source on the left = right ear lags.
        if (itd > 0.0 && ear == StoreEar::Right) || (itd < 0.0 && ear == StoreEar::Left) {
            (sample_rate as f32 * itd.abs()).round() as u64
        } else {
            0
        }
    }
}

fn copy_partitions(cell: &PartitionedHrir, ear: StoreEar, out: &mut PartitionedIr) {
    let source = match ear {
        StoreEar::Left => &cell.left,
        StoreEar::Right => &cell.right,
    };
    for (dst, src) in out.iter_mut().zip(source.iter()) {
        dst.copy_from_slice(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A table covering the sphere on a coarse grid, with a recognizable
    /// value at sample 0 so blends can be checked.
    fn build_store(block_size: usize, hrir_len: usize) -> HrirStore {
        let mut store = HrirStore::new(block_size);
        store.begin_setup(hrir_len, 1.95);
        for az in (0..360).step_by(15) {
            for el in (0..=75).step_by(15).chain((285..360).step_by(15)) {
                let mut left = vec![0.0; hrir_len];
                let mut right = vec![0.0; hrir_len];
                left[0] = 1.0 + az as f32 / 1000.0;
                right[0] = 2.0 + el as f32 / 1000.0;
                store.add_hrir(
                    az as f32,
                    el as f32,
                    HrirEntry {
                        left_delay: 10.0,
                        right_delay: 12.0,
                        left,
                        right,
                    },
                );
            }
        }
        assert!(store.end_setup());
        store
    }

    #[test]
    fn test_partition_invariants() {
        let store = build_store(64, 150);
        // ceil(150 / 64) = 3 partitions of 4 * 64 interleaved values
        assert_eq!(store.num_subfilters(), 3);
        let hrir = store
            .hrir_partitioned(StoreEar::Left, 30.0, 0.0, false)
            .unwrap();
        assert_eq!(hrir.len(), 3);
        assert!(hrir.iter().all(|p| p.len() == 256));
    }

    #[test]
    fn test_common_delay_removed_per_ear() {
        let store = build_store(64, 64);
        // All entries had (10, 12); the common part is gone per ear.
        let left = store.hrir_delay(StoreEar::Left, 0.0, 0.0, false);
        let right = store.hrir_delay(StoreEar::Right, 0.0, 0.0, false);
        assert_eq!(left, 0.0);
        assert_eq!(right, 0.0);
    }

    #[test]
    fn test_poles_present_and_azimuth_collapses() {
        let store = build_store(64, 64);
        let at_zero = store
            .hrir_partitioned(StoreEar::Left, 0.0, 90.0, true)
            .unwrap();
        let at_120 = store
            .hrir_partitioned(StoreEar::Left, 120.0, 90.0, true)
            .unwrap();
        assert_eq!(at_zero, at_120);
        assert!(store
            .hrir_partitioned(StoreEar::Right, 45.0, 270.0, true)
            .is_some());
    }

    #[test]
    fn test_seam_matches_zero() {
        let store = build_store(64, 64);
        let at_zero = store
            .hrir_partitioned(StoreEar::Left, 0.0, 30.0, true)
            .unwrap();
        let at_seam = store
            .hrir_partitioned(StoreEar::Left, 360.0, 30.0, true)
            .unwrap();
        assert_eq!(at_zero, at_seam);
    }

    #[test]
    fn test_interpolation_is_convex_blend() {
        let store = build_store(64, 64);
        // Between grid nodes: the DC bin of the first partition is a convex
        // combination of neighbouring values, all of which lie in a known
        // range (left values are 1.0..1.36 at sample 0).
        let hrir = store
            .hrir_partitioned(StoreEar::Left, 32.5, 32.5, true)
            .unwrap();
        // Coefficients are truncated to three decimals, so allow a hair of
        // slack around the measured range.
        let dc = hrir[0][0];
        assert!((0.99..=1.41).contains(&dc), "dc {dc}");
    }

    #[test]
    fn test_queries_rejected_during_setup() {
        let mut store = HrirStore::new(64);
        store.begin_setup(64, 1.95);
        store.add_hrir(
            0.0,
            0.0,
            HrirEntry {
                left_delay: 0.0,
                right_delay: 0.0,
                left: vec![1.0; 64],
                right: vec![1.0; 64],
            },
        );
        // Setup still in progress
        assert!(store.hrir_partitioned(StoreEar::Left, 0.0, 0.0, true).is_none());
        assert_eq!(store.hrir_delay(StoreEar::Left, 0.0, 0.0, true), 0.0);
    }

    #[test]
    fn test_customized_delay_woodworth() {
        let store = build_store(64, 64);
        // Head radius 0.0875 m, azimuth 90 (left side), elevation 0:
        // ITD = r * (pi/2 + 1) / c on the right ear only.
        let expected =
            (44_100.0 * 0.0875 * (std::f32::consts::FRAC_PI_2 + 1.0) / 343.0).round() as u64;
        let right = store.customized_delay(90.0, 0.0, StoreEar::Right, 0.0875, 44_100, 343.0);
        let left = store.customized_delay(90.0, 0.0, StoreEar::Left, 0.0875, 44_100, 343.0);
        assert_eq!(right, expected);
        assert_eq!(left, 0);
    }

    #[test]
    fn test_pole_sector_boundaries() {
        // border = ceil(360 / 4) = 90, inclusive on the lower edge only.
        let border = (360.0f32 / POLE_SECTOR_COUNT as f32).ceil() as i32;
        assert_eq!(border, 90);
        let sector = |az: i32| (az / border).clamp(0, POLE_SECTOR_COUNT - 1);
        assert_eq!(sector(0), 0);
        assert_eq!(sector(89), 0);
        assert_eq!(sector(90), 1);
        assert_eq!(sector(179), 1);
        assert_eq!(sector(180), 2);
        assert_eq!(sector(269), 2);
        assert_eq!(sector(270), 3);
        assert_eq!(sector(359), 3);
    }

    #[test]
    fn test_grid_is_dense_after_resampling() {
        let store = build_store(64, 64);
        for az in (0..360).step_by(5) {
            for el in (0..=90).step_by(5) {
                assert!(
                    store
                        .hrir_partitioned(StoreEar::Left, az as f32, el as f32, false)
                        .is_some(),
                    "missing ({az}, {el})"
                );
            }
        }
    }
}
