use anyhow::Result;
use rusqlite::params;

use crate::config::TacitConfig;

/// Display store statistics in the terminal.
pub fn stats(config: &TacitConfig, project: Option<&str>) -> Result<()> {
    let conn = super::open_existing(config)?;
    let project_id = project.unwrap_or(&config.storage.default_project);

    let count = |sql: &str| -> Result<i64> {
        Ok(conn.query_row(sql, params![project_id], |r| r.get(0))?)
    };

    let total = count("SELECT COUNT(*) FROM facts WHERE project_id = ?1")?;
    let live = count(
        "SELECT COUNT(*) FROM facts WHERE project_id = ?1 AND superseded_by IS NULL",
    )?;
    let entities = count("SELECT COUNT(*) FROM entities WHERE project_id = ?1")?;
    let relations = count("SELECT COUNT(*) FROM relations WHERE project_id = ?1")?;
    let sessions = count(
        "SELECT COUNT(DISTINCT source_session_id) FROM facts WHERE project_id = ?1",
    )?;

    println!("Knowledge Statistics ({project_id})");
    println!("{}", "=".repeat(40));
    println!("  Facts:               {total}");
    println!("  Live:                {live}");
    println!("  Superseded:          {}", total - live);
    println!();

    println!("By Kind:");
    let mut stmt = conn.prepare(
        "SELECT kind, COUNT(*) FROM facts \
         WHERE project_id = ?1 AND superseded_by IS NULL GROUP BY kind",
    )?;
    let by_kind: std::collections::HashMap<String, i64> = stmt
        .query_map(params![project_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;
    for kind in crate::store::types::FactKind::all() {
        let n = by_kind.get(kind.as_str()).copied().unwrap_or(0);
        println!("  {:<12} {n}", kind.as_str());
    }
    println!();

    println!("Entities:              {entities}");
    println!("Relations:             {relations}");
    println!("Sessions ingested:     {sessions}");

    let newest: Option<String> = conn
        .query_row(
            "SELECT MAX(created_at) FROM facts WHERE project_id = ?1",
            params![project_id],
            |r| r.get(0),
        )
        .unwrap_or(None);
    if let Some(newest) = newest {
        println!("Newest fact:           {newest}");
    }

    Ok(())
}
