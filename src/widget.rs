use eframe::egui::{
    self, Align2, Button, Color32, FontId, Label, Pos2, Rect, RichText, Rounding, Sense, Shape,
    Stroke, Ui, Vec2,
};

use crate::history::Reading;


const CHART_PADDING_X: f32 = 40.0;
const CHART_PADDING_Y: f32 = 10.0;
const CHART_GRID_LINES: usize = 5;


pub fn get_heart_rate_label(heart_rate: Option<u16>) -> Label {
    let live_hr_text = match heart_rate {
        Some(heart_rate) => RichText::new(format!("{heart_rate} BPM")).color(Color32::RED),
        None => RichText::new("--").color(Color32::GRAY),
    }
    .size(40.0);

    Label::new(live_hr_text)
}

pub fn get_status_label(message: &str) -> Label {
    Label::new(RichText::new(message).color(Color32::GRAY).size(14.0))
}

pub fn get_active_device_frame(device_name: &str) -> Label {
    let device_text = RichText::new(device_name)
        .color(Color32::WHITE)
        .background_color(Color32::RED)
        .size(20.0);

    Label::new(device_text)
}

pub fn get_disconnect_device_button() -> Button<'static> {
    let text = RichText::new("DC")
        .color(Color32::RED)
        .background_color(Color32::WHITE)
        .size(20.0);

    Button::new(text)
        .fill(Color32::BLUE)
        .rounding(Rounding::same(8.0))
}

pub fn get_rescan_button() -> Button<'static> {
    let text = RichText::new("Rescan")
        .color(Color32::WHITE)
        .size(20.0);

    Button::new(text)
        .fill(Color32::BLUE)
        .rounding(Rounding::same(8.0))
}

/// Lowest and highest heart rate in `readings`.
pub fn heart_rate_range(readings: &[Reading]) -> Option<(u16, u16)> {
    let min = readings.iter().map(|r| r.heart_rate).min()?;
    let max = readings.iter().map(|r| r.heart_rate).max()?;
    Some((min, max))
}

/// Screen positions for `readings` inside `rect`, in timestamp order.
///
/// Points are spread evenly along x regardless of their time gaps. A series with a single
/// distinct value is drawn as a flat line through the middle.
pub fn chart_points(readings: &[Reading], rect: Rect) -> Vec<Pos2> {
    let mut sorted = readings.to_vec();
    sorted.sort_by_key(|r| r.timestamp);

    let Some((min, max)) = heart_rate_range(&sorted) else {
        return Vec::new();
    };
    let count = sorted.len();
    let step = |index: usize| {
        if count > 1 {
            index as f32 / (count - 1) as f32
        } else {
            0.5
        }
    };

    if max == min {
        return (0..count)
            .map(|index| Pos2::new(rect.left() + step(index) * rect.width(), rect.center().y))
            .collect();
    }

    let range = f32::from(max - min);
    sorted
        .iter()
        .enumerate()
        .map(|(index, reading)| {
            let x = rect.left()
                + step(index) * (rect.width() - CHART_PADDING_X)
                + CHART_PADDING_X / 2.0;
            let normalized = f32::from(reading.heart_rate - min) / range;
            let y = rect.bottom()
                - normalized * (rect.height() - 2.0 * CHART_PADDING_Y)
                - CHART_PADDING_Y;
            Pos2::new(x, y)
        })
        .collect()
}

pub fn draw_heart_rate_chart(ui: &mut Ui, readings: &[Reading], height: f32) {
    let size = Vec2::new(ui.available_width(), height);
    let (response, painter) = ui.allocate_painter(size, Sense::hover());
    let rect = response.rect;

    let grid = Stroke::new(1.0, Color32::from_gray(60));
    for line in 0..CHART_GRID_LINES {
        let y = rect.top() + rect.height() * line as f32 / CHART_GRID_LINES as f32;
        painter.line_segment([Pos2::new(rect.left(), y), Pos2::new(rect.right(), y)], grid);
    }

    if readings.len() > 1 {
        let points = chart_points(readings, rect);
        painter.add(Shape::line(points, Stroke::new(2.0, Color32::RED)));
    }

    if let Some((min, max)) = heart_rate_range(readings) {
        let font = FontId::proportional(10.0);
        let (top, bottom) = (rect.left_top(), rect.left_bottom());
        painter.text(top, Align2::LEFT_TOP, max.to_string(), font.clone(), Color32::GRAY);
        painter.text(bottom, Align2::LEFT_BOTTOM, min.to_string(), font, Color32::GRAY);
    }
}

/// Placeholder shown where the chart goes while there is nothing to plot.
pub fn draw_chart_placeholder(ui: &mut Ui, message: &str, height: f32) {
    ui.allocate_ui(Vec2::new(ui.available_width(), height), |ui| {
        ui.vertical_centered(|ui| {
            ui.add(egui::Spinner::new());
            ui.add(get_status_label(message));
        });
    });
}
