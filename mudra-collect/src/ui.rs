use crate::session::{Mode, Session};
use mudra_core::dataset::Dataset;
use mudra_core::smoothing::PalmFacing;
use ratatui::Frame;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Style, Stylize};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Paragraph, Wrap};

const FINGER_NAMES: [&str; 5] = ["thumb", "index", "middle", "ring", "pinky"];

/// Per-frame facts about the detected hand.
#[derive(Debug, Clone, Default)]
pub struct HandStatus {
    pub detected: bool,
    pub fingers: [bool; 5],
    pub palm: Option<PalmFacing>,
    pub prediction: Option<(String, f32)>,
    pub last_sign: Option<String>,
}

pub struct View<'a> {
    pub session: &'a Session,
    pub dataset: &'a Dataset,
    pub hand: &'a HandStatus,
    pub message: &'a str,
}

pub fn draw(frame: &mut Frame, view: &View) {
    let [header, body, help] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(6),
        Constraint::Length(3),
    ])
    .areas(frame.area());
    let [status, counts] =
        Layout::horizontal([Constraint::Percentage(60), Constraint::Percentage(40)]).areas(body);

    frame.render_widget(
        Paragraph::new(mode_line(view.session)).block(Block::bordered().title(" mudra-collect ")),
        header,
    );
    frame.render_widget(
        Paragraph::new(status_lines(view))
            .wrap(Wrap { trim: true })
            .block(Block::bordered().title(" Hand ")),
        status,
    );
    frame.render_widget(
        Paragraph::new(count_lines(view.dataset)).block(Block::bordered().title(" Samples ")),
        counts,
    );
    frame.render_widget(
        Paragraph::new(help_line(view.session)).block(Block::bordered()),
        help,
    );
}

fn mode_line(session: &Session) -> Line<'static> {
    match session.mode() {
        Mode::Naming(buffer) => Line::from(vec![
            Span::raw("Sign name: "),
            Span::raw(buffer.clone()).bold(),
            Span::raw("_").slow_blink(),
        ]),
        Mode::Paused => Line::from(vec![
            Span::raw(format!("{} ", session.sign().unwrap_or_default())).bold(),
            Span::styled("PAUSED", Style::default().fg(Color::Yellow)),
        ]),
        Mode::Recording { count } => Line::from(vec![
            Span::raw(format!("{} ", session.sign().unwrap_or_default())).bold(),
            Span::styled("● REC", Style::default().fg(Color::Red)),
            Span::raw(format!(" {count}/{}", session.samples_per_sign())),
        ]),
    }
}

fn status_lines(view: &View) -> Vec<Line<'static>> {
    let hand = view.hand;
    let mut lines = Vec::new();

    if hand.detected {
        lines.push(Line::from(Span::styled(
            "Hand detected",
            Style::default().fg(Color::Green),
        )));
        let fingers: Vec<&str> = FINGER_NAMES
            .iter()
            .zip(hand.fingers.iter())
            .filter(|(_, up)| **up)
            .map(|(name, _)| *name)
            .collect();
        lines.push(Line::from(format!(
            "Extended: {}",
            if fingers.is_empty() {
                "none".to_string()
            } else {
                fingers.join(", ")
            }
        )));
        if let Some(palm) = hand.palm {
            lines.push(Line::from(format!("Palm: {palm:?}")));
        }
    } else {
        lines.push(Line::from(Span::styled(
            "No hand",
            Style::default().fg(Color::DarkGray),
        )));
    }

    if let Some((label, confidence)) = &hand.prediction {
        lines.push(Line::from(format!(
            "Prediction: {label} ({:.0}%)",
            confidence * 100.
        )));
    }
    if let Some(sign) = &hand.last_sign {
        lines.push(Line::from(vec![Span::raw("Last sign: "), Span::raw(sign.clone()).bold()]));
    }

    if !view.message.is_empty() {
        lines.push(Line::default());
        lines.push(Line::from(view.message.to_string()).italic());
    }
    lines
}

fn count_lines(dataset: &Dataset) -> Vec<Line<'static>> {
    let mut lines: Vec<Line> = dataset
        .label_map()
        .names()
        .iter()
        .zip(dataset.class_counts())
        .map(|(name, count)| Line::from(format!("{name}: {count}")))
        .collect();
    lines.push(Line::from(format!("total: {}", dataset.len())).bold());
    lines
}

fn help_line(session: &Session) -> Line<'static> {
    match session.mode() {
        Mode::Naming(_) => Line::from("Type a sign name, ENTER to confirm, ESC to quit"),
        _ => Line::from("SPACE record/pause   N next sign   Q quit"),
    }
}
