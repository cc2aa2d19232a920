use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use eframe::egui;
use log::info;
use tokio::sync::watch;

use whoophr::bthr::BtleplugTransport;
use whoophr::fake::SimulatedTransport;
use whoophr::signal::{self, Command, EventSink};
use whoophr::{widget, Args, LinkHandle, LinkStatus};

const REPAINT_INTERVAL: Duration = Duration::from_millis(250);
const CHART_HEIGHT: f32 = 150.0;


#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let (sink, queue) = signal::channel();
    let link = if args.simulate {
        let transport = SimulatedTransport::start(sink.clone());
        LinkHandle::spawn(args.link_config(), transport, sink, queue)
    } else {
        let transport = BtleplugTransport::start(sink.clone()).await?;
        LinkHandle::spawn(args.link_config(), transport, sink, queue)
    };

    let result = if args.headless {
        log_readings(link.status()).await;
        Ok(())
    } else {
        run_window(link.status(), link.commands())
    };

    // Release the strap whichever way we leave.
    link.shutdown().await;
    result
}

fn run_window(status: watch::Receiver<LinkStatus>, commands: EventSink) -> Result<()> {
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([350.0, 280.0]),
        ..Default::default()
    };
    eframe::run_native(
        "whoophr",
        native_options,
        Box::new(|cc| Ok(Box::new(MyApp::new(cc, status, commands)))),
    )
    .map_err(|error| anyhow!("window failed: {error}"))
}

async fn log_readings(mut status: watch::Receiver<LinkStatus>) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status.borrow_and_update().clone();
                match status.current_heart_rate {
                    Some(heart_rate) => info!("heartbeat: {heart_rate}"),
                    None => info!("{}", status.status_message),
                }
            }
        }
    }
}


struct MyApp {
    status: watch::Receiver<LinkStatus>,
    commands: EventSink,
    title: String,
}

impl MyApp {
    fn new(
        _cc: &eframe::CreationContext<'_>,
        status: watch::Receiver<LinkStatus>,
        commands: EventSink,
    ) -> Self {
        MyApp {
            status,
            commands,
            title: String::new(),
        }
    }

    fn update_title(&mut self, ctx: &egui::Context, status: &LinkStatus) {
        let badge = status.badge();
        if badge != self.title {
            ctx.send_viewport_cmd(egui::ViewportCommand::Title(badge.clone()));
            self.title = badge;
        }
    }
}

impl eframe::App for MyApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let status = self.status.borrow_and_update().clone();
        self.update_title(ctx, &status);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add(widget::get_heart_rate_label(status.current_heart_rate));

            ui.horizontal(|ui| {
                if let Some(device_name) = &status.device_name {
                    ui.add(widget::get_active_device_frame(device_name));
                }
                if status.connected && ui.add(widget::get_disconnect_device_button()).clicked() {
                    self.commands.emit(Command::Disconnect);
                }
                if ui.add(widget::get_rescan_button()).clicked() {
                    self.commands.emit(Command::Rescan);
                }
            });

            if status.connected && status.current_heart_rate.is_none() {
                ui.add(widget::get_status_label("Waiting for data..."));
            } else {
                ui.add(widget::get_status_label(&status.status_message));
            }

            if status.connected && !status.history.is_empty() {
                widget::draw_heart_rate_chart(ui, &status.history, CHART_HEIGHT);
            } else if status.connected {
                widget::draw_chart_placeholder(ui, "Collecting data...", CHART_HEIGHT);
            } else {
                widget::draw_chart_placeholder(ui, &status.status_message, CHART_HEIGHT);
            }
        });

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}
