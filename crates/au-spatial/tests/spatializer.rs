//! End-to-end scenarios through the full core

use au_core::{AudioState, Ear, Transform, Vector3};
use au_spatial::hrtf::HrirEntry;
use au_spatial::{Core, SpatializationMode};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Install a synthetic HRTF whose left IR is a delta at `left_tap` and
/// right IR a delta at `right_tap`, identical for every direction.
fn load_synthetic_hrtf(core: &mut Core, hrir_len: usize, left_tap: usize, right_tap: usize) {
    let hrtf = core.listener_mut().unwrap().hrtf_mut();
    hrtf.begin_setup(hrir_len, 1.95);
    for az in (0..360).step_by(15) {
        for el in (0..=75).step_by(15).chain((285..360).step_by(15)) {
            let mut left = vec![0.0; hrir_len];
            let mut right = vec![0.0; hrir_len];
            left[left_tap] = 1.0;
            right[right_tap] = 1.0;
            hrtf.add_hrir(
                az as f32,
                el as f32,
                HrirEntry {
                    left_delay: 0.0,
                    right_delay: 0.0,
                    left,
                    right,
                },
            );
        }
    }
    assert!(hrtf.end_setup());
    core.refresh_source_buffers();
}

fn argmax(buffer: &[f32]) -> usize {
    buffer
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())
        .map(|(i, _)| i)
        .unwrap()
}

#[test]
fn delta_source_lands_on_the_synthetic_taps() {
    init_logs();
    // Block 512 at 44.1 kHz, a source one metre ahead, delta input, and a
    // synthetic HRIR with taps at 10 (left) and 15 (right): the output
    // peaks must sit exactly on the taps.
    let state = AudioState::new(44_100, 512).unwrap();
    let mut core = Core::new(state);
    core.create_listener(0.0875);
    load_synthetic_hrtf(&mut core, 64, 10, 15);

    let id = core.create_source();
    {
        let source = core.source_mut(id).unwrap();
        source.set_source_transform(Transform::from_position(Vector3::new(1.0, 0.0, 0.0)));
        source.set_distance_attenuation_anechoic(false);
        source.set_far_distance_enabled(false);
        source.set_near_field_enabled(false);
        source.set_reverb_enabled(false);
        source.set_interpolation(false);
    }

    let mut input = vec![0.0f32; 512];
    input[0] = 1.0;
    let mut stereo = vec![0.0f32; 1024];
    core.process_all_with_inputs(&[(id, &input)], &mut stereo);

    let left: Vec<f32> = stereo.iter().step_by(2).copied().collect();
    let right: Vec<f32> = stereo.iter().skip(1).step_by(2).copied().collect();
    assert_eq!(argmax(&left), 10);
    assert_eq!(argmax(&right), 15);
    assert!(left[10] > 0.5, "left peak {}", left[10]);
    assert!(right[15] > 0.5, "right peak {}", right[15]);
}

#[test]
fn custom_itd_delays_the_far_ear() {
    init_logs();
    // Head radius 0.0875 m, source at azimuth 90 (left side): the Woodworth
    // ITD lands on the right ear only, rounded to samples.
    let state = AudioState::new(44_100, 512).unwrap();
    let mut core = Core::new(state);
    core.create_listener(0.0875);
    load_synthetic_hrtf(&mut core, 64, 0, 0);
    core.listener_mut().unwrap().enable_custom_itd(true);

    let id = core.create_source();
    {
        let source = core.source_mut(id).unwrap();
        // One metre to the left
        source.set_source_transform(Transform::from_position(Vector3::new(0.0, 1.0, 0.0)));
        source.set_distance_attenuation_anechoic(false);
        source.set_far_distance_enabled(false);
        source.set_near_field_enabled(false);
        source.set_reverb_enabled(false);
    }

    let expected =
        (44_100.0 * 0.0875 * (std::f32::consts::FRAC_PI_2 + 1.0) / 343.0).round() as usize;

    // First block establishes the delay with silence; the second block's
    // delta then shows the steady-state lag.
    let silence = vec![0.0f32; 512];
    let mut delta = vec![0.0f32; 512];
    delta[0] = 1.0;
    let mut stereo = vec![0.0f32; 1024];
    core.process_all_with_inputs(&[(id, &silence)], &mut stereo);
    core.process_all_with_inputs(&[(id, &delta)], &mut stereo);

    let left: Vec<f32> = stereo.iter().step_by(2).copied().collect();
    let right: Vec<f32> = stereo.iter().skip(1).step_by(2).copied().collect();
    assert_eq!(argmax(&left), 0);
    assert_eq!(argmax(&right), expected);
}

#[test]
fn disabled_pipeline_preserves_the_input() {
    init_logs();
    // Every flag off and the source in no-spatialization mode: both output
    // channels carry the input unchanged through the whole core.
    let state = AudioState::new(48_000, 256).unwrap();
    let mut core = Core::new(state);
    core.create_listener(0.0875);

    let id = core.create_source();
    {
        let source = core.source_mut(id).unwrap();
        source.set_spatialization_mode(SpatializationMode::NoSpatialization);
        source.set_distance_attenuation_anechoic(false);
        source.set_far_distance_enabled(false);
        source.set_reverb_enabled(false);
        source.set_source_transform(Transform::from_position(Vector3::new(2.0, 0.0, 0.0)));
    }
    core.hearing_loss_mut().set_enabled(Ear::Both, false);

    let input: Vec<f32> = (0..256)
        .map(|i| (std::f32::consts::TAU * 440.0 * i as f32 / 48_000.0).sin())
        .collect();
    let mut stereo = vec![0.0f32; 512];
    core.process_all_with_inputs(&[(id, &input)], &mut stereo);

    for (i, x) in input.iter().enumerate() {
        assert!((stereo[2 * i] - x).abs() < 1e-6);
        assert!((stereo[2 * i + 1] - x).abs() < 1e-6);
    }
}

#[test]
fn moving_source_output_stays_bounded() {
    init_logs();
    // Sweeping a source across the front must never produce samples beyond
    // twice the input peak (the expansion method absorbs ITD changes).
    let state = AudioState::new(44_100, 256).unwrap();
    let mut core = Core::new(state);
    core.create_listener(0.0875);
    load_synthetic_hrtf(&mut core, 128, 4, 8);
    core.listener_mut().unwrap().enable_custom_itd(true);

    let id = core.create_source();
    {
        let source = core.source_mut(id).unwrap();
        source.set_reverb_enabled(false);
        source.set_near_field_enabled(false);
    }

    let mut stereo = vec![0.0f32; 512];
    for step in 0..40 {
        let angle = (step as f32 / 40.0) * std::f32::consts::PI - std::f32::consts::FRAC_PI_2;
        let position = Vector3::new(angle.cos() * 2.0, angle.sin() * 2.0, 0.0);
        core.source_mut(id)
            .unwrap()
            .set_source_transform(Transform::from_position(position));
        let input: Vec<f32> = (0..256)
            .map(|i| (std::f32::consts::TAU * 500.0 * (step * 256 + i) as f32 / 44_100.0).sin())
            .collect();
        core.process_all_with_inputs(&[(id, &input)], &mut stereo);
        let peak = stereo.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(peak <= 2.0, "peak {peak} at step {step}");
    }
}

#[test]
fn image_sources_add_reflections() {
    init_logs();
    // A shoebox with the image-source engine enabled adds reflection energy
    // on top of the direct path.
    let state = AudioState::new(44_100, 256).unwrap();
    let mut core = Core::new(state);
    core.create_listener(0.0875);
    load_synthetic_hrtf(&mut core, 64, 0, 0);

    let id = core.create_source();
    core.source_mut(id)
        .unwrap()
        .set_source_transform(Transform::from_position(Vector3::new(2.0, 0.0, 0.0)));
    core.source_mut(id).unwrap().set_reverb_enabled(false);

    let input = vec![0.5f32; 256];
    let mut stereo = vec![0.0f32; 512];

    // Reference render without reflections
    core.process_all_with_inputs(&[(id, &input)], &mut stereo);
    let direct_energy: f32 = stereo.iter().map(|s| s * s).sum();

    // Enable the room and let the reflections ring in
    core.ism_mut().room_mut().setup_shoebox(10.0, 6.0, 3.0);
    core.set_ism_enabled(true);
    let mut with_reflections = 0.0f32;
    for _ in 0..6 {
        core.process_all_with_inputs(&[(id, &input)], &mut stereo);
        with_reflections = stereo.iter().map(|s| s * s).sum();
    }
    assert!(
        with_reflections > direct_energy * 1.05,
        "reflections added no energy: {with_reflections} vs {direct_energy}"
    );
}
