use console::Style;
use detrend_core::pipeline::{CalibStats, RunConfig, RunStats};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    ok: Style,
    error: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            ok: Style::new().green(),
            error: Style::new().red().bold(),
            path: Style::new().underlined(),
        }
    }
}

fn rule(s: &Styles, width: usize) {
    println!("  {}", s.title.apply_to("\u{2550}".repeat(width)));
}

pub fn print_run_header(config: &RunConfig, day: &str, ccd: u8) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Detrend Run"));
    rule(&s, 11);
    println!();
    println!("  {:<14}{}", s.label.apply_to("Day"), s.value.apply_to(day));
    println!("  {:<14}{}", s.label.apply_to("CCD"), s.value.apply_to(ccd));
    println!(
        "  {:<14}{}",
        s.label.apply_to("Store"),
        s.path.apply_to(config.store_root.display())
    );
    println!();

    let clip = &config.bias.clip;
    println!("  {}", s.header.apply_to("Combination"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Sigma"),
        s.value.apply_to(clip.sigma)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Iterations"),
        s.value.apply_to(clip.maxiters)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Bias skip"),
        s.value.apply_to(config.bias.skip_first)
    );
    println!();

    let c = &config.corrections;
    println!("  {}", s.header.apply_to("Corrections"));
    for (name, on) in [
        ("Non-linear", c.corr_nl),
        ("Overscan", c.corr_overscan),
        ("Pocket", c.corr_pocket),
    ] {
        let state = if on { s.ok.apply_to("on") } else { s.label.apply_to("off") };
        println!("    {:<12}{}", s.label.apply_to(name), state);
    }
    println!();

    let p = &config.photometry;
    println!("  {}", s.header.apply_to("Photometry"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Radii"),
        s.value.apply_to(format!(
            "{}..{} px, {} steps",
            p.radius_min, p.radius_max, p.radius_steps
        ))
    );
    println!();
}

pub fn print_run_summary(stats: &RunStats) {
    let s = Styles::new();

    println!();
    println!(
        "  {:<14}{}",
        s.label.apply_to("Bias"),
        s.value.apply_to(format!("{:.2} s", stats.bias.time))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Flat"),
        s.value.apply_to(format!("{:.2} s", stats.flat.time))
    );
    for group in &stats.science {
        println!(
            "  {}",
            s.header
                .apply_to(format!("{} {} c{:02}", group.day, group.filter, group.ccd))
        );
        for file in &group.files {
            let status = if file.is_ok() {
                s.ok.apply_to("ok".to_string())
            } else {
                s.error.apply_to(format!("error: {}", file.error_msg))
            };
            println!(
                "    {:<12}{:>8.2} s  {}",
                s.label.apply_to(file.expid),
                file.time,
                status
            );
        }
    }
    println!();
    println!(
        "  {:<14}{}",
        s.label.apply_to("Exposures"),
        s.value.apply_to(stats.n_exposures())
    );
    let n_errors = stats.count_errors();
    let errors = if n_errors == 0 {
        s.ok.apply_to(n_errors)
    } else {
        s.error.apply_to(n_errors)
    };
    println!("  {:<14}{}", s.label.apply_to("Errors"), errors);
    println!(
        "  {:<14}{}",
        s.label.apply_to("Total"),
        s.value.apply_to(format!("{:.2} s", stats.total_time))
    );
    if let Some(path) = &stats.report_path {
        println!("  {:<14}{}", s.label.apply_to("Report"), s.path.apply_to(path.display()));
    }
    println!();
}

pub fn print_calib_summary(stats: &CalibStats) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to(format!("Calibration {}", stats.period)));
    rule(&s, 12 + stats.period.len());
    for ccd in &stats.ccds {
        let status = if ccd.is_ok() {
            s.ok.apply_to(format!(
                "bias {}+{} flat {}+{}",
                ccd.bias.combined, ccd.bias.loaded, ccd.flat.combined, ccd.flat.loaded
            ))
        } else {
            s.error.apply_to(format!("error: {}", ccd.error_msg))
        };
        println!("  {:<14}{}", s.label.apply_to(format!("c{:02}", ccd.ccd)), status);
    }
    println!();
    println!(
        "  {:<14}{}",
        s.label.apply_to("Failed"),
        s.value.apply_to(stats.count_errors())
    );
    if let Some(path) = &stats.report_path {
        println!("  {:<14}{}", s.label.apply_to("Report"), s.path.apply_to(path.display()));
    }
    println!();
}
