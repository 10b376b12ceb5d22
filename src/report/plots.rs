use std::io;
use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;

use super::ConfusionMatrix;
use crate::training::History;

fn chart_err<E: std::fmt::Display>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

/// Renders the per-epoch training curves to a PNG: accuracy and loss panels
/// (train vs validation), plus a learning-rate panel when `include_lr` is
/// set.
pub fn plot_history(history: &History, path: &Path, include_lr: bool) -> io::Result<()> {
    if history.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "history has no epochs to plot",
        ));
    }

    let panels: usize = if include_lr { 3 } else { 2 };
    let root = BitMapBackend::new(path, (500 * panels as u32, 400)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;
    let areas = root.split_evenly((1, panels));

    draw_curves(
        &areas[0],
        "Accuracy Over Epochs",
        &[
            ("Train Accuracy", &history.accuracy, BLUE),
            ("Validation Accuracy", &history.val_accuracy, RED),
        ],
    )?;
    draw_curves(
        &areas[1],
        "Loss Over Epochs",
        &[
            ("Train Loss", &history.loss, BLUE),
            ("Validation Loss", &history.val_loss, RED),
        ],
    )?;
    if include_lr {
        draw_curves(
            &areas[2],
            "Learning Rate Over Epochs",
            &[("Learning Rate", &history.learning_rate, RED)],
        )?;
    }

    root.present().map_err(chart_err)
}

fn draw_curves(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    title: &str,
    series: &[(&str, &Vec<f32>, RGBColor)],
) -> io::Result<()> {
    let epochs = series.iter().map(|(_, v, _)| v.len()).max().unwrap_or(0);
    let (lo, hi) = value_range(series.iter().flat_map(|(_, v, _)| v.iter().copied()));

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0f32..(epochs.max(2) - 1) as f32, lo..hi)
        .map_err(chart_err)?;
    chart
        .configure_mesh()
        .x_desc("Epochs")
        .draw()
        .map_err(chart_err)?;

    for &(label, values, color) in series {
        chart
            .draw_series(LineSeries::new(
                values.iter().enumerate().map(|(i, &v)| (i as f32, v)),
                &color,
            ))
            .map_err(chart_err)?
            .label(label)
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 18, y)], color.stroke_width(2))
            });
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(chart_err)?;
    Ok(())
}

/// Renders the confusion matrix as a heatmap PNG with per-cell counts.
///
/// # Panics
/// Panics if `class_names` does not match the matrix.
pub fn plot_confusion(
    matrix: &ConfusionMatrix,
    class_names: &[String],
    path: &Path,
) -> io::Result<()> {
    let n = matrix.num_classes();
    assert_eq!(class_names.len(), n, "one name per class is required");

    const CELL: i32 = 90;
    const LEFT: i32 = 130;
    const TOP: i32 = 60;
    let width = (LEFT + CELL * n as i32 + 40) as u32;
    let height = (TOP + CELL * n as i32 + 70) as u32;

    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;

    root.draw(&Text::new(
        "Confusion Matrix",
        (LEFT, 20),
        ("sans-serif", 24).into_font(),
    ))
    .map_err(chart_err)?;

    let peak = matrix.counts().iter().copied().max().unwrap_or(0).max(1);
    for row in 0..n {
        for col in 0..n {
            let count = matrix.count(row, col);
            let intensity = count as f32 / peak as f32;
            let color = heat_color(intensity);

            let x0 = LEFT + col as i32 * CELL;
            let y0 = TOP + row as i32 * CELL;
            root.draw(&Rectangle::new(
                [(x0, y0), (x0 + CELL, y0 + CELL)],
                color.filled(),
            ))
            .map_err(chart_err)?;
            root.draw(&Rectangle::new(
                [(x0, y0), (x0 + CELL, y0 + CELL)],
                BLACK.stroke_width(1),
            ))
            .map_err(chart_err)?;

            let text_color = if intensity > 0.5 { WHITE } else { BLACK };
            root.draw(&Text::new(
                count.to_string(),
                (x0 + CELL / 2 - 8, y0 + CELL / 2 - 8),
                ("sans-serif", 18).into_font().color(&text_color),
            ))
            .map_err(chart_err)?;
        }
    }

    for (row, name) in class_names.iter().enumerate() {
        root.draw(&Text::new(
            name.clone(),
            (8, TOP + row as i32 * CELL + CELL / 2 - 8),
            ("sans-serif", 15).into_font(),
        ))
        .map_err(chart_err)?;
        root.draw(&Text::new(
            name.clone(),
            (LEFT + row as i32 * CELL + 6, TOP + CELL * n as i32 + 10),
            ("sans-serif", 15).into_font(),
        ))
        .map_err(chart_err)?;
    }
    root.draw(&Text::new(
        "Predicted",
        (LEFT + (CELL * n as i32) / 2 - 30, TOP + CELL * n as i32 + 40),
        ("sans-serif", 17).into_font(),
    ))
    .map_err(chart_err)?;
    root.draw(&Text::new(
        "True",
        (8, TOP - 25),
        ("sans-serif", 17).into_font(),
    ))
    .map_err(chart_err)?;

    root.present().map_err(chart_err)
}

/// White-to-blue ramp for cell intensities in `[0, 1]`.
fn heat_color(intensity: f32) -> RGBColor {
    let t = intensity.clamp(0.0, 1.0);
    let lerp = |from: u8, to: u8| (from as f32 + (to as f32 - from as f32) * t).round() as u8;
    RGBColor(lerp(255, 31), lerp(255, 119), lerp(255, 180))
}

fn value_range(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for v in values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if hi - lo < 1e-6 {
        lo -= 0.5;
        hi += 0.5;
    } else {
        let pad = (hi - lo) * 0.05;
        lo -= pad;
        hi += pad;
    }
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heat_color_interpolates_white_to_blue() {
        assert_eq!(heat_color(0.0), RGBColor(255, 255, 255));
        assert_eq!(heat_color(1.0), RGBColor(31, 119, 180));
        let mid = heat_color(0.5);
        assert!(mid.0 > 31 && mid.0 < 255);
    }

    #[test]
    fn value_range_pads_degenerate_spans() {
        let (lo, hi) = value_range([0.5f32, 0.5, 0.5].into_iter());
        assert!(lo < 0.5 && hi > 0.5);

        let (lo, hi) = value_range(std::iter::empty());
        assert_eq!((lo, hi), (0.0, 1.0));
    }
}
