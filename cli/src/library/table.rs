use blobsnap_library::Snapshot;
use chrono::Local;
use console::style;
use indicatif::HumanBytes;
use tabled::{
    builder::Builder,
    settings::{Style, Theme},
};

pub fn print_snapshot_table(snapshots: &[Snapshot]) -> anyhow::Result<()> {
    let header = ["Snapshot Name", "Local Datetime", "Size", "Key"]
        .iter()
        .map(|s| style(s).green().bold().to_string())
        .collect::<Vec<String>>();

    let mut builder = Builder::default();
    builder.push_record(header);

    for snapshot in snapshots {
        let local_datetime = snapshot
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S%.3f");

        builder.push_record(vec![
            snapshot.name.to_string(),
            local_datetime.to_string(),
            HumanBytes(snapshot.size_bytes).to_string(),
            snapshot.key.clone(),
        ]);
    }

    let mut table = builder.build();

    let mut style = Theme::from_style(Style::markdown());
    style.remove_borders_horizontal();

    table.with(style);

    println!("{}", table);

    Ok(())
}
