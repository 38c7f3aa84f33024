use crate::game::{ClientPhase, RenderFrame, RenderPlayer};
use macroquad::prelude::*;
use shared::{COIN_RADIUS, PLAYER_RADIUS};

const BACKGROUND: Color = Color::new(0.10, 0.10, 0.12, 1.0);
const COIN_COLOR: Color = Color::new(1.0, 0.84, 0.0, 1.0);
const OVERLAY: Color = Color::new(0.0, 0.0, 0.0, 0.6);
const PANEL_TEXT: f32 = 20.0;

/// Player colors in join order
const PLAYER_COLORS: [Color; 4] = [
    Color::new(0.25, 0.41, 0.88, 1.0), // royal blue
    Color::new(0.86, 0.08, 0.24, 1.0), // crimson
    Color::new(0.20, 0.80, 0.20, 1.0), // lime
    Color::new(1.0, 0.65, 0.0, 1.0),   // orange
];

pub fn player_color(color_index: u8) -> Color {
    PLAYER_COLORS[color_index as usize % PLAYER_COLORS.len()]
}

pub struct Renderer {
    width: f32,
    height: f32,
}

impl Renderer {
    pub fn new(width: f32, height: f32) -> Self {
        Renderer { width, height }
    }

    pub fn render(&mut self, frame: &RenderFrame) {
        clear_background(BACKGROUND);
        draw_rectangle_lines(0.0, 0.0, self.width, self.height, 2.0, DARKGRAY);

        for coin in &frame.coins {
            draw_circle(coin.pos.x, coin.pos.y, COIN_RADIUS, COIN_COLOR);
            draw_circle_lines(coin.pos.x, coin.pos.y, COIN_RADIUS, 1.0, ORANGE);
        }

        for player in &frame.players {
            self.draw_player(player);
        }

        self.draw_debug_panel(frame);
        if matches!(frame.phase, ClientPhase::Playing | ClientPhase::Countdown) {
            self.draw_scoreboard(frame);
        }

        match frame.phase {
            ClientPhase::Connecting => self.draw_connecting(frame),
            ClientPhase::Lobby => self.draw_lobby(frame),
            ClientPhase::Countdown => self.draw_countdown(frame),
            ClientPhase::Playing => {}
            ClientPhase::GameOver => self.draw_game_over(frame),
            ClientPhase::Disconnected => self.draw_disconnected(frame),
        }
    }

    fn draw_player(&mut self, player: &RenderPlayer) {
        let (x, y) = (player.position.x, player.position.y);
        draw_circle(x, y, PLAYER_RADIUS, player_color(player.color_index));
        if player.is_local {
            draw_circle_lines(x, y, PLAYER_RADIUS + 2.0, 2.0, WHITE);
        }

        let label = if player.is_local {
            format!("{} (you)", player.name)
        } else {
            player.name.clone()
        };
        let size = measure_text(&label, None, 16, 1.0);
        draw_text(&label, x - size.width / 2.0, y - PLAYER_RADIUS - 6.0, 16.0, WHITE);
    }

    /// Prediction / reconciliation / interpolation indicators and round-trip time
    fn draw_debug_panel(&mut self, frame: &RenderFrame) {
        let y_start = 10.0;
        let indicator_size = 12.0;
        let spacing = 25.0;

        let features = [
            ("P", frame.toggles.prediction),
            ("R", frame.toggles.reconciliation),
            ("I", frame.toggles.interpolation),
        ];

        for (i, (label, enabled)) in features.iter().enumerate() {
            let x = 10.0 + (i as f32) * spacing;
            let color = if *enabled { GREEN } else { RED };

            draw_rectangle(x, y_start, indicator_size, indicator_size, color);
            draw_rectangle_lines(x, y_start, indicator_size, indicator_size, 1.0, WHITE);

            draw_text(label, x + 3.0, y_start + indicator_size + 12.0, 12.0, WHITE);
        }

        let connection_color = if frame.phase == ClientPhase::Disconnected {
            RED
        } else if frame.local_id.is_some() {
            GREEN
        } else {
            YELLOW
        };
        draw_rectangle(10.0, y_start + 35.0, 8.0, 8.0, connection_color);
        draw_text("CON", 20.0, y_start + 35.0 + 8.0, 12.0, WHITE);

        let ping_y = y_start + 50.0;
        let rtt = frame.rtt_ms.unwrap_or(0.0).max(0.0) as u64;
        let ping_bars = ((rtt / 100).min(10)) as i32;

        for i in 0..10i32 {
            let bar_color = if i < ping_bars {
                if rtt < 200 {
                    GREEN
                } else if rtt < 600 {
                    YELLOW
                } else {
                    RED
                }
            } else {
                Color::from_rgba(51, 51, 51, 255)
            };

            draw_rectangle(10.0 + (i as f32) * 3.0, ping_y, 2.0, 8.0, bar_color);
        }

        let ping_text = match frame.rtt_ms {
            Some(rtt) => format!("RTT {:.0}ms", rtt),
            None => "RTT --".to_string(),
        };
        draw_text(&ping_text, 45.0, ping_y + 8.0, 12.0, WHITE);
    }

    fn draw_scoreboard(&mut self, frame: &RenderFrame) {
        let clock = frame.clock_remaining.max(0.0).ceil() as u32;
        let clock_text = format!("{}:{:02}", clock / 60, clock % 60);
        let size = measure_text(&clock_text, None, 32, 1.0);
        draw_text(&clock_text, (self.width - size.width) / 2.0, 32.0, 32.0, WHITE);

        let mut ranked: Vec<&RenderPlayer> = frame.players.iter().collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));

        for (i, player) in ranked.iter().enumerate() {
            let y = 24.0 + i as f32 * 22.0;
            let x = self.width - 170.0;
            draw_circle(x, y - 5.0, 6.0, player_color(player.color_index));
            let line = format!("{:<12} {:>3}", player.name, player.score);
            draw_text(&line, x + 12.0, y, PANEL_TEXT, WHITE);
        }
    }

    fn draw_connecting(&mut self, frame: &RenderFrame) {
        self.draw_overlay();
        self.draw_centered("Connecting...", self.height / 2.0, 36.0, WHITE);
        if let Some(status) = &frame.status {
            self.draw_centered(status, self.height / 2.0 + 36.0, PANEL_TEXT, ORANGE);
            self.draw_centered(
                "Press SPACE to try again",
                self.height / 2.0 + 64.0,
                PANEL_TEXT,
                LIGHTGRAY,
            );
        }
    }

    fn draw_lobby(&mut self, frame: &RenderFrame) {
        self.draw_overlay();
        let mut y = self.height / 2.0 - 100.0;
        self.draw_centered("Lobby", y, 40.0, WHITE);
        y += 40.0;

        if let Some(lobby) = &frame.lobby {
            let waiting = format!(
                "{} / {} players (need {} to start)",
                lobby.players.len(),
                lobby.max,
                lobby.min
            );
            self.draw_centered(&waiting, y, PANEL_TEXT, LIGHTGRAY);
            y += 34.0;

            for player in &lobby.players {
                let marker = if Some(player.id) == frame.local_id {
                    " (you)"
                } else {
                    ""
                };
                let line = format!("{}{}", player.name, marker);
                let size = measure_text(&line, None, PANEL_TEXT as u16, 1.0);
                let x = (self.width - size.width) / 2.0;
                draw_circle(x - 14.0, y - 6.0, 7.0, player_color(player.color_index));
                draw_text(&line, x, y, PANEL_TEXT, WHITE);
                y += 26.0;
            }
        } else {
            self.draw_centered("Waiting for players...", y, PANEL_TEXT, LIGHTGRAY);
        }
    }

    fn draw_countdown(&mut self, frame: &RenderFrame) {
        let remaining = frame.countdown_remaining.unwrap_or(0.0).ceil() as u32;
        let text = if remaining == 0 {
            "GO!".to_string()
        } else {
            remaining.to_string()
        };
        self.draw_centered(&text, self.height / 2.0, 96.0, YELLOW);
    }

    fn draw_game_over(&mut self, frame: &RenderFrame) {
        self.draw_overlay();
        let mut y = self.height / 2.0 - 120.0;
        self.draw_centered("Game Over", y, 48.0, WHITE);
        y += 44.0;

        if let Some(over) = &frame.game_over {
            let headline = match &over.winner_name {
                Some(name) if over.winner_id == frame.local_id => format!("You win, {}!", name),
                Some(name) => format!("{} wins!", name),
                None => "No winner".to_string(),
            };
            self.draw_centered(&headline, y, 28.0, YELLOW);
            y += 40.0;

            for (rank, score) in over.final_scores.iter().enumerate() {
                let line = format!("{}. {}  {}", rank + 1, score.name, score.score);
                let color = if Some(score.id) == frame.local_id {
                    GREEN
                } else {
                    WHITE
                };
                self.draw_centered(&line, y, PANEL_TEXT, color);
                y += 26.0;
            }
        }

        self.draw_centered(
            "Press SPACE to play again",
            y + 20.0,
            PANEL_TEXT,
            LIGHTGRAY,
        );
    }

    fn draw_disconnected(&mut self, frame: &RenderFrame) {
        self.draw_overlay();
        self.draw_centered("Disconnected", self.height / 2.0, 40.0, RED);
        if let Some(status) = &frame.status {
            self.draw_centered(status, self.height / 2.0 + 36.0, PANEL_TEXT, LIGHTGRAY);
        }
        self.draw_centered(
            "Press SPACE to reconnect",
            self.height / 2.0 + 70.0,
            PANEL_TEXT,
            LIGHTGRAY,
        );
    }

    fn draw_overlay(&mut self) {
        draw_rectangle(0.0, 0.0, self.width, self.height, OVERLAY);
    }

    fn draw_centered(&mut self, text: &str, y: f32, font_size: f32, color: Color) {
        let size = measure_text(text, None, font_size as u16, 1.0);
        draw_text(text, (self.width - size.width) / 2.0, y, font_size, color);
    }
}
