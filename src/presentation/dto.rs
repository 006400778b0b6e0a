// Mapper to convert domain models to JSON response types
use crate::domain::history::StatusTransition;
use crate::domain::machine::{MachineSet, MachineSnapshot, OperatingState, StatusDurations};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetDto {
    pub cycle: u64,
    pub machines: Vec<MachineDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDto {
    pub index: usize,
    pub id: usize,
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub status: u16,
    pub status_name: &'static str,
    /// Seconds in the current status
    pub current_status_duration: u64,
    pub status_times: StatusTimesDto,
    pub last_updated: Option<DateTime<Utc>>,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTimesDto {
    pub operational: u64,
    pub quality_stop: u64,
    pub logistic_stop: u64,
    pub maintenance_stop: u64,
}

/// Fraction of the accumulated time spent in each state.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeShareDto {
    pub operational: f64,
    pub quality_stop: f64,
    pub logistic_stop: f64,
    pub maintenance_stop: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDetailsDto {
    #[serde(flatten)]
    pub machine: MachineDto,
    pub time_share: TimeShareDto,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionDto {
    pub from: u16,
    pub from_name: &'static str,
    pub to: u16,
    pub to_name: &'static str,
    pub observed_at: DateTime<Utc>,
    pub previous_duration: u64,
}

#[derive(Debug, Serialize)]
pub struct RefreshDto {
    pub cycle: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorDto {
    pub error: String,
}

pub fn machine_set_to_dto(set: &MachineSet) -> MachineSetDto {
    MachineSetDto {
        cycle: set.cycle,
        machines: set.machines.iter().map(machine_to_dto).collect(),
    }
}

pub fn machine_to_dto(machine: &MachineSnapshot) -> MachineDto {
    MachineDto {
        index: machine.index,
        id: machine.id(),
        name: machine.name(),
        ip: machine.address.host.clone(),
        port: machine.address.port,
        status: machine.state.raw(),
        status_name: machine.state.label(),
        current_status_duration: machine.dwell_secs,
        status_times: status_times_to_dto(&machine.durations),
        last_updated: machine.last_read,
        connected: machine.connected,
    }
}

pub fn machine_details_to_dto(machine: &MachineSnapshot) -> MachineDetailsDto {
    MachineDetailsDto {
        machine: machine_to_dto(machine),
        time_share: time_share(&machine.durations),
    }
}

pub fn transition_to_dto(transition: &StatusTransition) -> TransitionDto {
    TransitionDto {
        from: transition.from.raw(),
        from_name: transition.from.label(),
        to: transition.to.raw(),
        to_name: transition.to.label(),
        observed_at: transition.observed_at,
        previous_duration: transition.previous_dwell_secs,
    }
}

fn status_times_to_dto(durations: &StatusDurations) -> StatusTimesDto {
    StatusTimesDto {
        operational: durations.operational,
        quality_stop: durations.quality_stop,
        logistic_stop: durations.logistic_stop,
        maintenance_stop: durations.maintenance_stop,
    }
}

fn time_share(durations: &StatusDurations) -> TimeShareDto {
    let total = durations.total();
    let share = |state: OperatingState| {
        if total == 0 {
            0.0
        } else {
            durations.get(state) as f64 / total as f64
        }
    };

    TimeShareDto {
        operational: share(OperatingState::Operational),
        quality_stop: share(OperatingState::QualityStop),
        logistic_stop: share(OperatingState::LogisticStop),
        maintenance_stop: share(OperatingState::MaintenanceStop),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::machine::MachineAddress;

    #[test]
    fn test_time_share() {
        let durations = StatusDurations {
            operational: 75,
            quality_stop: 25,
            ..Default::default()
        };
        let share = time_share(&durations);
        assert_eq!(share.operational, 0.75);
        assert_eq!(share.quality_stop, 0.25);
        assert_eq!(share.maintenance_stop, 0.0);

        let empty = time_share(&StatusDurations::default());
        assert_eq!(empty.operational, 0.0);
    }

    #[test]
    fn test_machine_json_shape() {
        let machine = MachineSnapshot::seed(4, MachineAddress::new("172.16.8.114", 502));
        let json = serde_json::to_value(machine_to_dto(&machine)).unwrap();

        assert_eq!(json["id"], 5);
        assert_eq!(json["name"], "Machine 5");
        assert_eq!(json["ip"], "172.16.8.114");
        assert_eq!(json["status"], 1);
        assert_eq!(json["statusName"], "Operational");
        assert_eq!(json["statusTimes"]["maintenanceStop"], 0);
        assert!(json["lastUpdated"].is_null());
        assert_eq!(json["connected"], false);
    }
}
